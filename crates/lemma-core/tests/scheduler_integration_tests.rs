use lemma_core::{
    CoreError, ModuleAddress, ModuleRegistry, Parameters, SchedulerConfig, ServiceDescriptor,
    ServiceProcessManager, ServiceResult,
};
use lemma_test_utils::{init_test_logging, Gate, ScriptedExecutor};
use serde_json::json;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL_MS: u64 = 100;

fn manager() -> ServiceProcessManager {
    init_test_logging();
    let config = SchedulerConfig {
        lock_poll_interval_ms: POLL_INTERVAL_MS,
        ..Default::default()
    };
    ServiceProcessManager::new(ModuleRegistry::new(), config).unwrap()
}

fn m012() -> ModuleAddress {
    ModuleAddress::new("M012")
}

fn loader() -> ServiceDescriptor {
    ServiceDescriptor::new("load", "Loader", "loading module")
}

#[test]
fn test_m012_mutual_exclusion() {
    let manager = manager();
    let arbiter = manager.arbiter();
    let p1 = manager.create_service_process("P1");

    // P1 takes the lock, re-locking is a no-op
    assert_eq!(arbiter.lock(&p1, &m012(), &loader()), Ok(true));
    assert_eq!(arbiter.lock(&p1, &m012(), &loader()), Ok(false));

    let (tx, rx) = mpsc::channel();
    let p2_thread = {
        let manager = manager.clone();
        thread::spawn(move || {
            let p2 = manager.create_service_process("P2");
            tx.send(p2.clone()).unwrap();
            let locked = manager.arbiter().lock(&p2, &m012(), &loader());
            let acquired_at = Instant::now();
            (locked, acquired_at, p2)
        })
    };

    // P2 blocks while P1 holds the lock
    let p2 = rx.recv().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !p2.is_blocked() {
        assert!(Instant::now() < deadline, "P2 never blocked");
        thread::sleep(Duration::from_millis(1));
    }
    thread::sleep(Duration::from_millis(2 * POLL_INTERVAL_MS));
    assert!(p2.is_blocked());
    assert_eq!(arbiter.lock_owner(&m012()), Some(p1.id()));

    // P2 acquires within one polling interval after P1 unlocks
    let released_at = Instant::now();
    assert_eq!(arbiter.unlock(&p1, &m012()), Ok(true));
    let (locked, acquired_at, p2) = p2_thread.join().unwrap();
    assert_eq!(locked, Ok(true));
    assert!(acquired_at.duration_since(released_at) < Duration::from_millis(POLL_INTERVAL_MS));
    assert!(!p2.is_blocked());
    assert_eq!(arbiter.lock_owner(&m012()), Some(p2.id()));
    assert_eq!(manager.blocked_modules(&p2), vec![m012()]);

    // P1 no longer owns the lock
    assert_eq!(
        arbiter.unlock(&p1, &m012()),
        Err(CoreError::LockNotOwned {
            module: m012(),
            owner: p2.id(),
            requester: p1.id(),
        })
    );
    assert_eq!(arbiter.unlock(&p2, &m012()), Ok(true));
    assert_eq!(arbiter.unlock(&p2, &m012()), Ok(false));
}

#[test]
fn test_success_fault_and_panic_release_lock() {
    let manager = manager();
    manager.register_plugin(ScriptedExecutor::warning("warn"));
    manager.register_plugin(ScriptedExecutor::faulting("fault", "unknown predicate"));
    manager.register_plugin(ScriptedExecutor::panicking("panic", "checker bug"));

    let result = manager
        .execute_plugin("warn", &m012(), Parameters::new(), None)
        .unwrap();
    assert!(result.is_ok());
    assert!(result.has_warnings());
    assert_eq!(manager.arbiter().lock_owner(&m012()), None);

    let result = manager
        .execute_plugin("fault", &m012(), Parameters::new(), None)
        .unwrap();
    assert!(!result.is_ok());
    assert!(result.has_errors());
    assert_eq!(manager.arbiter().lock_owner(&m012()), None);

    let result = manager
        .execute_plugin("panic", &m012(), Parameters::new(), None)
        .unwrap();
    assert!(result.has_errors());
    assert!(result.error_message().unwrap().contains("checker bug"));
    assert_eq!(manager.arbiter().lock_owner(&m012()), None);

    let statuses: Vec<bool> = manager
        .service_processes()
        .iter()
        .map(|p| p.was_successful())
        .collect();
    assert_eq!(statuses, vec![true, false, false]);
}

#[test]
fn test_cancelled_call_releases_lock_for_other_process() {
    let manager = manager();
    manager.register_plugin(ScriptedExecutor::cancelling("cancel"));

    let err = manager
        .execute_plugin("cancel", &m012(), Parameters::new(), None)
        .unwrap_err();
    assert!(err.is_interrupted());
    assert!(manager.service_processes()[0].was_failure());

    // Another process gets the lock right away
    let other = {
        let manager = manager.clone();
        thread::spawn(move || {
            let process = manager.create_service_process("other");
            manager.arbiter().lock(&process, &m012(), &loader())
        })
    };
    assert_eq!(other.join().unwrap(), Ok(true));
}

#[test]
fn test_nested_reentrant_call_keeps_outer_lock() {
    let manager = manager();
    manager.register_plugin(ScriptedExecutor::succeeding("inner"));
    manager.register_plugin(ScriptedExecutor::nested("outer", "inner", None));
    manager.register_plugin(ScriptedExecutor::nested("outermost", "outer", None));

    let result = manager
        .execute_plugin("outermost", &m012(), Parameters::new(), None)
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(result.payload().unwrap()["payload"]["ok"], json!(true));

    let calls = manager.service_calls();
    assert_eq!(calls.len(), 3);
    let new_locks: Vec<bool> = calls.iter().map(|c| c.has_new_lock()).collect();
    assert_eq!(new_locks, vec![true, false, false]);
    assert_eq!(calls[2].depth(), 2);
    assert!(calls.iter().all(|c| c.result().unwrap().is_ok()));
    assert_eq!(manager.arbiter().locked_count(), 0);
}

#[test]
fn test_nested_fault_fails_process_but_keeps_outer_running() {
    let manager = manager();
    manager.register_plugin(ScriptedExecutor::faulting("inner", "bad proof"));
    manager.register_plugin(ScriptedExecutor::nested(
        "outer",
        "inner",
        Some(ModuleAddress::new("B")),
    ));

    let result = manager
        .execute_plugin("outer", &m012(), Parameters::new(), None)
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(result.payload().unwrap()["errors"], json!(true));
    assert!(manager.service_processes()[0].was_failure());
    assert_eq!(manager.arbiter().locked_count(), 0);
}

#[test]
fn test_waiting_process_runs_after_gate_opens() {
    let manager = manager();
    let gate = Gate::new();
    manager.register_plugin(ScriptedExecutor::gated("gated", gate.clone()));
    manager.register_plugin(ScriptedExecutor::succeeding("quick"));

    let first = {
        let manager = manager.clone();
        thread::spawn(move || manager.execute_plugin("gated", &m012(), Parameters::new(), None))
    };
    assert!(gate.wait_entered(1, Duration::from_secs(5)));

    let second = {
        let manager = manager.clone();
        thread::spawn(move || manager.execute_plugin("quick", &m012(), Parameters::new(), None))
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while !manager.service_processes().iter().any(|p| p.is_blocked()) {
        assert!(Instant::now() < deadline, "second process never blocked");
        thread::sleep(Duration::from_millis(1));
    }
    let running = manager.running_service_processes();
    assert_eq!(running.len(), 2);
    assert_eq!(running[0].processed_modules(), vec![m012()]);
    assert_eq!(running[0].execution_action_description(), "waiting at gate");

    gate.open();
    assert!(first.join().unwrap().unwrap().is_ok());
    assert!(second.join().unwrap().unwrap().is_ok());
    assert!(manager.running_service_processes().is_empty());
    assert_eq!(manager.remove_all_service_processes(), 2);
}

#[test]
fn test_terminate_all_cancels_running_work() {
    let manager = manager();
    let gate = Gate::new();
    manager.register_plugin(ScriptedExecutor::gated("gated", gate.clone()));

    let worker = {
        let manager = manager.clone();
        thread::spawn(move || manager.execute_plugin("gated", &m012(), Parameters::new(), None))
    };
    assert!(gate.wait_entered(1, Duration::from_secs(5)));

    assert_eq!(manager.terminate_all_service_processes(), 1);
    let err = worker.join().unwrap().unwrap_err();
    assert!(err.is_interrupted());
    assert_eq!(manager.arbiter().locked_count(), 0);

    let call = &manager.service_calls()[0];
    assert_eq!(call.result(), Some(ServiceResult::interrupted()));
}
