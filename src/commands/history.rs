use anyhow::Result;

use crate::config::Config;
use crate::history::InstallHistory;
use crate::runtime::Runtime;

/// Print the most recent operations, oldest first.
#[tracing::instrument(skip(runtime, config))]
pub fn history<R: Runtime>(runtime: &R, config: &Config, limit: usize) -> Result<()> {
    let history = InstallHistory::new(runtime, &config.state_dir);
    let records = history.recent(limit)?;
    if records.is_empty() {
        println!("No history.");
        return Ok(());
    }

    for record in records {
        print!(
            "{} {} {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.operation,
            record.targets.join(" ")
        );
        match &record.error {
            Some(error) => println!(" (error: {})", error),
            None => println!(),
        }
        for result in &record.results {
            println!("    {}", result);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryRecord, Operation};
    use crate::runtime::MockRuntime;
    use std::path::PathBuf;

    #[test]
    fn test_history_without_records() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| false);

        let config = Config {
            state_dir: PathBuf::from("/var/lib/tooldeck"),
            ..Config::default()
        };
        history(&runtime, &config, 10).unwrap();
    }

    #[test]
    fn test_history_with_records() {
        let record = HistoryRecord::new(Operation::AddRepo, vec!["kali".to_string()])
            .error(Some("repository \"kali\" is already configured".to_string()));
        let line = format!("{}\n", serde_json::to_string(&record).unwrap());

        let mut runtime = MockRuntime::new();
        runtime
            .expect_exists()
            .withf(|path| path.ends_with("history.jsonl"))
            .returning(|_| true);
        runtime
            .expect_read_to_string()
            .returning(move |_| Ok(line.clone()));

        history(&runtime, &Config::default(), 10).unwrap();
    }
}
