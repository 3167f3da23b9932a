use mirror_sim::{run_simulator, SimulatorConfig, Violation};
use mirror_sync::SyncConfig;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_live_scheduler_does_not_disturb_checkpoints() {
    let config = SimulatorConfig {
        seed: 2024,
        steps: 400,
        checkpoint_every: 20,
        stop_on_first_violation: false,
        sync: SyncConfig::new()
            .with_reconcile_interval(Duration::from_millis(1))
            .with_max_idle_wait(Duration::from_millis(1)),
    };

    let report = run_simulator(config).await.unwrap();
    assert!(report.passed(), "{}", report.generate_text());
}

#[tokio::test]
async fn test_stop_on_violation_keeps_clean_runs_going() {
    let config = SimulatorConfig {
        seed: 9,
        steps: 150,
        checkpoint_every: 15,
        stop_on_first_violation: true,
        sync: SyncConfig::new().with_reconcile_interval(Duration::from_secs(3600)),
    };

    let report = run_simulator(config).await.unwrap();
    assert_eq!(report.violations, Vec::<Violation>::new());
    assert_eq!(report.stats.steps, 150);
}

#[tokio::test]
async fn test_final_check_runs_without_periodic_checkpoints() {
    let config = SimulatorConfig {
        seed: 5,
        steps: 80,
        checkpoint_every: 0,
        stop_on_first_violation: false,
        sync: SyncConfig::new().with_reconcile_interval(Duration::from_secs(3600)),
    };

    let report = run_simulator(config).await.unwrap();
    assert!(report.passed(), "{}", report.generate_text());
    assert_eq!(report.stats.checkpoints, 1);
    assert_eq!(report.engine.reconcile_passes, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_every_seed_keeps_mirror_in_sync(seed in any::<u64>(), checkpoint_every in 1u64..12) {
        let config = SimulatorConfig {
            seed,
            steps: 120,
            checkpoint_every,
            stop_on_first_violation: true,
            sync: SyncConfig::new().with_reconcile_interval(Duration::from_secs(3600)),
        };

        let report = runtime().block_on(run_simulator(config)).unwrap();
        prop_assert!(report.passed(), "{}", report.generate_text());
    }
}
