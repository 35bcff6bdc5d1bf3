use clap::Parser;
use resumable_transfer::cli::TransferArgs;
use resumable_transfer::config::{EngineConfig, StoreBackend};
use resumable_transfer::progress::OperationStatus;
use resumable_transfer::shutdown::ShutdownCoordinator;
use tempfile::TempDir;

/// A transfer interrupted by shutdown pauses after its first batch with a
/// checkpoint, and the next run finishes the remaining input.
#[tokio::test]
async fn shutdown_pauses_transfer_with_checkpoint() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("trades.csv");
    let output = dir.path().join("trades.jsonl");
    let rows: String = (1..=7).map(|i| format!("{i},{}\n", i * 10)).collect();
    std::fs::write(&input, format!("id,price\n{rows}")).unwrap();

    let args = TransferArgs::parse_from([
        "transfer",
        "--input",
        input.to_str().unwrap(),
        "--from",
        "csv",
        "--output",
        output.to_str().unwrap(),
        "--to",
        "jsonl",
        "--batch-size",
        "3",
        "--operation-id",
        "trades",
    ]);
    let engine = EngineConfig {
        backend: StoreBackend::File,
        state_dir: dir.path().join("state"),
        ..EngineConfig::default()
    };

    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let (progress, outcome) = args.run(&engine, shutdown).await.unwrap();
    assert!(outcome.paused);
    assert_eq!(progress.status, OperationStatus::Paused);
    assert_eq!(outcome.consumed, 3);
    assert_eq!(std::fs::read_to_string(&output).unwrap().lines().count(), 3);

    let stores = engine.open_stores().await.unwrap();
    let checkpoint = stores.checkpoints.load("trades").await.unwrap().unwrap();
    assert_eq!(checkpoint.state_u64("recordsConsumed"), Some(3));

    let (progress, outcome) = args
        .run(&engine, ShutdownCoordinator::shared())
        .await
        .unwrap();
    assert!(!outcome.paused);
    assert_eq!(progress.status, OperationStatus::Completed);
    assert_eq!(progress.processed_records, 7);

    let ids: Vec<String> = std::fs::read_to_string(&output)
        .unwrap()
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["id"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(ids, (1..=7).map(|i| i.to_string()).collect::<Vec<_>>());
}
