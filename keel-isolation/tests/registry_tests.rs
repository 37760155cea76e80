use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::Command;

use keel_core::{NodeConfig, Role, parse};
use keel_isolation::*;

/// Check if running as root
fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Captures formatted log output for assertions
#[derive(Clone, Default)]
struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn task(id: &str) -> TaskId {
    TaskId::new(id).unwrap()
}

#[tokio::test]
async fn test_create_then_destroy_twice() {
    let registry = IsolationRegistry::builtin(&NodeConfig::default());

    let mut handle = registry.create("process");
    assert!(handle.is_some());

    registry.destroy(&mut handle).await.unwrap();
    assert!(handle.is_none());
    registry.destroy(&mut handle).await.unwrap();
}

#[tokio::test]
async fn test_unknown_and_gated_kinds() {
    let registry = IsolationRegistry::builtin(&NodeConfig::default());

    assert!(registry.create("unknown-xyz").is_none());
    assert_eq!(registry.lookup("unknown-xyz"), Availability::Unknown);
    assert_eq!(registry.create("cgroups").is_some(), CGROUPS_SUPPORTED);

    let mut nothing = registry.create("unknown-xyz");
    registry.destroy(&mut nothing).await.unwrap();
}

#[test]
fn test_miss_diagnostics_distinguish_unknown_from_unsupported() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let mut registry = IsolationRegistry::builtin(&NodeConfig::default());
        registry.mark_unsupported("jail");

        assert!(registry.create("jail").is_none());
        assert!(registry.create("unknown-xyz").is_none());
    });

    let output = String::from_utf8_lossy(&logs.0.lock().unwrap()).into_owned();
    assert!(output.contains("kind=\"jail\" availability=not supported on this build"), "{output}");
    assert!(output.contains("kind=\"unknown-xyz\" availability=unknown"), "{output}");
}

#[tokio::test]
async fn test_process_handle_drives_task_lifecycle() {
    let registry = IsolationRegistry::builtin(&NodeConfig::default());
    let mut handle = registry.create("process");
    let backend = handle.as_ref().unwrap();

    let node = parse("cpus:4;mem:4096", &Role::default()).unwrap();
    backend.initialize(&node).await.unwrap();

    let mut child = Command::new("sleep")
        .arg("30")
        .process_group(0)
        .spawn()
        .unwrap();
    let pid = ProcessId::from_raw(i32::try_from(child.id()).unwrap());

    let alloc = parse("cpus:1;mem:128", &Role::default()).unwrap();
    backend.launch(&task("job-1"), pid, &alloc).await.unwrap();
    assert_eq!(backend.usage(&task("job-1")).await.unwrap().cpus_limit, Some(1.0));

    // Shutdown kills whatever is still tracked
    registry.destroy(&mut handle).await.unwrap();

    assert_eq!(child.wait().unwrap().signal(), Some(libc::SIGKILL));
}

#[tokio::test]
async fn test_cgroups_backend_in_scratch_hierarchy() {
    if !CGROUPS_SUPPORTED {
        println!("Skipping: built without cgroup support");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig {
        cgroups_root: dir.path().to_path_buf(),
        cgroups_hierarchy: "keel-test".to_string(),
        ..NodeConfig::default()
    };
    let registry = IsolationRegistry::builtin(&config);
    let mut handle = registry.create("cgroups");
    let backend = handle.as_ref().unwrap();

    backend.initialize(&ResourceSet::new()).await.unwrap();
    assert!(dir.path().join("keel-test").is_dir());

    let alloc = parse("cpus:0.25;mem:64", &Role::default()).unwrap();
    backend
        .launch(&task("job-1"), ProcessId::from_raw(i32::MAX), &alloc)
        .await
        .unwrap();
    let cpu_max = std::fs::read_to_string(dir.path().join("keel-test/job-1/cpu.max")).unwrap();
    assert_eq!(cpu_max, "25000 100000");

    registry.destroy(&mut handle).await.unwrap();
    assert!(!dir.path().join("keel-test").exists());
}

#[tokio::test]
async fn test_real_cgroup_hierarchy() {
    if !is_root() || !CGROUPS_SUPPORTED {
        println!("Skipping: requires root and cgroup support");
        return;
    }
    if !std::path::Path::new("/sys/fs/cgroup/cgroup.controllers").exists() {
        println!("Skipping: cgroup v2 not mounted");
        return;
    }

    let config = NodeConfig {
        cgroups_hierarchy: format!("keel-test-{}", std::process::id()),
        ..NodeConfig::default()
    };
    let registry = IsolationRegistry::builtin(&config);
    let mut handle = registry.create("cgroups");
    let backend = handle.as_ref().unwrap();
    backend.initialize(&ResourceSet::new()).await.unwrap();

    let mut child = Command::new("sleep").arg("30").spawn().unwrap();
    let pid = ProcessId::from_raw(i32::try_from(child.id()).unwrap());

    let alloc = parse("cpus:0.5;mem:64", &Role::default()).unwrap();
    backend.launch(&task("sleeper"), pid, &alloc).await.unwrap();

    let stats = backend.usage(&task("sleeper")).await.unwrap();
    assert_eq!(stats.cpus_limit, Some(0.5));

    backend.kill(&task("sleeper")).await.unwrap();
    assert_eq!(child.wait().unwrap().signal(), Some(libc::SIGKILL));

    registry.destroy(&mut handle).await.unwrap();
    assert!(!config.cgroups_path().exists());
}
