use std::thread;

use anyhow::{Result, anyhow};
use npmship_types::{AggregateError, BufferedReporter, PluginError, Reporter};

/// Run `task` for every item on its own thread.
///
/// Messages are buffered per item and replayed into `reporter` in item order
/// once all tasks finish. Every failure is collected: typed errors merge into
/// one [`AggregateError`], anything else is reported together with them.
pub(crate) fn fan_out<I, T, F>(items: &[I], reporter: &mut dyn Reporter, task: F) -> Result<Vec<T>>
where
    I: Sync,
    T: Send,
    F: Fn(&I, &mut dyn Reporter) -> Result<T> + Sync,
{
    let task = &task;
    let finished: Vec<(BufferedReporter, Result<T>)> = thread::scope(|scope| {
        let handles: Vec<_> = items
            .iter()
            .map(|item| {
                scope.spawn(move || {
                    let mut buffer = BufferedReporter::new();
                    let result = task(item, &mut buffer);
                    (buffer, result)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| (BufferedReporter::new(), Err(anyhow!("package task panicked"))))
            })
            .collect()
    });

    let mut values = Vec::with_capacity(finished.len());
    let mut typed = AggregateError::default();
    let mut untyped = Vec::new();
    for (buffer, result) in finished {
        buffer.replay(reporter);
        match result {
            Ok(value) => values.push(value),
            Err(err) => match classify(err) {
                Failure::Typed(errors) => typed.merge(errors),
                Failure::Untyped(err) => untyped.push(err),
            },
        }
    }

    combine_failures(typed, untyped, "package tasks failed")?;
    Ok(values)
}

/// Report every collected failure at once.
///
/// Typed errors alone stay an [`AggregateError`] and a lone untyped error
/// passes through unchanged. A mix is listed under `heading`.
pub(crate) fn combine_failures(
    typed: AggregateError,
    mut untyped: Vec<anyhow::Error>,
    heading: &str,
) -> Result<()> {
    if untyped.is_empty() {
        typed.into_result()?;
        return Ok(());
    }
    if typed.is_empty() && untyped.len() == 1 {
        return Err(untyped.remove(0));
    }

    let mut message = format!("{} {heading}:", untyped.len() + typed.errors().len());
    for err in &untyped {
        message.push_str(&format!("\n  {err:#}"));
    }
    for err in typed.errors() {
        message.push_str(&format!("\n  {}: {err}", err.code()));
    }
    Err(anyhow!(message))
}

enum Failure {
    Typed(AggregateError),
    Untyped(anyhow::Error),
}

fn classify(err: anyhow::Error) -> Failure {
    let err = match err.downcast::<PluginError>() {
        Ok(plugin) => return Failure::Typed(plugin.into()),
        Err(err) => err,
    };
    match err.downcast::<AggregateError>() {
        Ok(aggregate) => Failure::Typed(aggregate),
        Err(err) => Failure::Untyped(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use npmship_types::Level;

    #[test]
    fn results_and_messages_keep_item_order() {
        let mut reporter = BufferedReporter::new();
        let values = fan_out(&[3u64, 1, 2], &mut reporter, |n, reporter| {
            std::thread::sleep(std::time::Duration::from_millis(n * 10));
            reporter.info(&format!("item {n}"));
            Ok(n * 2)
        })
        .expect("fan out");

        assert_eq!(values, vec![6, 2, 4]);
        assert_eq!(
            reporter.messages(Level::Info).collect::<Vec<_>>(),
            vec!["item 3", "item 1", "item 2"]
        );
    }

    #[test]
    fn typed_failures_are_aggregated() {
        let mut reporter = BufferedReporter::new();
        let err = fan_out(&["a", "b", "c"], &mut reporter, |name, _| {
            if *name == "b" {
                return Ok(());
            }
            Err(PluginError::NoNpmToken {
                registry: format!("https://{name}.example/"),
            }
            .into())
        })
        .expect_err("two failures");

        let aggregate = err.downcast::<AggregateError>().expect("aggregate");
        assert_eq!(aggregate.codes(), vec!["ENONPMTOKEN", "ENONPMTOKEN"]);
    }

    #[test]
    fn single_untyped_failure_passes_through() {
        let mut reporter = BufferedReporter::new();
        let err = fan_out(&[1, 2], &mut reporter, |n, _| {
            if *n == 2 {
                anyhow::bail!("npm publish exited with code 1");
            }
            Ok(())
        })
        .expect_err("failure");
        assert_eq!(err.to_string(), "npm publish exited with code 1");
    }

    #[test]
    fn mixed_failures_are_listed_together() {
        let mut reporter = BufferedReporter::new();
        let err = fan_out(&[1, 2], &mut reporter, |n, _| -> Result<()> {
            if *n == 1 {
                anyhow::bail!("disk full");
            }
            Err(PluginError::InvalidNpmToken {
                registry: "https://registry.npmjs.org/".into(),
            }
            .into())
        })
        .expect_err("failures");
        let rendered = err.to_string();
        assert!(rendered.starts_with("2 package tasks failed:"));
        assert!(rendered.contains("disk full"));
        assert!(rendered.contains("EINVALIDNPMTOKEN"));
    }
}
