// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fleetexec::commands::UploadBytes;
use fleetexec::transport::memory::{MemoryConnector, MemoryHost};
use fleetexec::{Engine, Error, HostConfig, HostOutcome};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn single_host() -> (Engine, Arc<MemoryHost>) {
    let connector = Arc::new(MemoryConnector::new());
    let memory = connector.add_host("10.0.0.1:22", MemoryHost::new());
    let engine = Engine::new(vec![HostConfig::with_password("a", "10.0.0.1", "ops", "secret")])
        .with_connector(connector);
    (engine, memory)
}

async fn run_one(engine: &Engine, command: &str) -> HostOutcome {
    let report = engine.execute(&[command]).await.unwrap();
    report.outcome("a").unwrap().clone()
}

fn failure_source(outcome: &HostOutcome) -> &Error {
    match outcome.error.as_deref() {
        Some(Error::CommandFailed { source, .. }) => source,
        other => panic!("expected a failed in-band command, got {other:?}"),
    }
}

/// Cancel `cancel` once `ready` holds, polling every few milliseconds.
fn cancel_when<F>(cancel: &CancellationToken, ready: F) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !ready() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("transfer never started");
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    })
}

#[tokio::test]
async fn test_upload_download_round_trip() {
    let (engine, memory) = single_host();
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("payload.bin");
    let contents: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    std::fs::write(&source, &contents).unwrap();

    let upload = run_one(
        &engine,
        &format!("fleet.upload {} /srv/app/payload.bin", source.display()),
    )
    .await;
    assert!(upload.is_success(), "{:?}", upload.error);
    assert!(memory.has_dir("/srv/app"));
    assert_eq!(memory.read_file("/srv/app/payload.bin").unwrap(), contents);

    let target = dir.path().join("back").join("payload.bin");
    let download = run_one(
        &engine,
        &format!("fleet.download /srv/app/payload.bin {}", target.display()),
    )
    .await;
    assert!(download.is_success(), "{:?}", download.error);
    assert!(download.completed[0].output.starts_with("downloaded 65536 bytes"));

    let fetched = std::fs::read(&target).unwrap();
    assert_eq!(fetched.len(), contents.len());
    assert_eq!(fetched, contents);
}

#[tokio::test]
async fn test_empty_file_round_trip() {
    let (engine, memory) = single_host();
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("empty");
    std::fs::write(&source, b"").unwrap();

    let upload = run_one(&engine, &format!("fleet.upload {} /empty", source.display())).await;
    assert!(upload.is_success());
    assert_eq!(memory.read_file("/empty").unwrap(), Vec::<u8>::new());

    let target = dir.path().join("empty.copy");
    let download = run_one(&engine, &format!("fleet.download /empty {}", target.display())).await;
    assert!(download.is_success());
    assert!(std::fs::read(&target).unwrap().is_empty());
}

#[tokio::test]
async fn test_mkdir_is_idempotent() {
    let (engine, memory) = single_host();

    let report = engine
        .execute(&["fleet.mkdir /opt/app/releases", "fleet.mkdir /opt/app/releases"])
        .await
        .unwrap();
    let outcome = report.outcome("a").unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.completed.len(), 2);
    assert!(memory.has_dir("/opt/app/releases"));
    assert!(memory.has_dir("/opt/app"));
}

#[tokio::test]
async fn test_mkdir_over_file_fails() {
    let (engine, memory) = single_host();
    memory.write_file("/opt/app", "not a directory");

    let outcome = run_one(&engine, "fleet.mkdir /opt/app/logs").await;
    assert!(matches!(failure_source(&outcome), Error::Transfer { .. }));
    assert!(!memory.has_dir("/opt/app/logs"));
}

#[tokio::test]
async fn test_failed_upload_removes_partial_remote_file() {
    let (engine, memory) = single_host();
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("big.bin");
    std::fs::write(&source, vec![7u8; 4096]).unwrap();
    memory.set_transfer_limit(Some(100));

    let outcome = run_one(&engine, &format!("fleet.upload {} /srv/big.bin", source.display())).await;
    assert!(matches!(failure_source(&outcome), Error::Transfer { .. }));
    assert!(!memory.has_file("/srv/big.bin"));
}

#[tokio::test]
async fn test_failed_download_removes_partial_local_file() {
    let (engine, memory) = single_host();
    memory.write_file("/var/log/app.log", vec![b'x'; 4096]);
    memory.set_transfer_limit(Some(100));

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("app.log");
    let outcome = run_one(
        &engine,
        &format!("fleet.download /var/log/app.log {}", target.display()),
    )
    .await;
    assert!(matches!(failure_source(&outcome), Error::Transfer { .. }));
    assert!(!target.exists());
}

#[tokio::test]
async fn test_download_missing_file() {
    let (engine, _memory) = single_host();
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("missing");

    let outcome = run_one(
        &engine,
        &format!("fleet.download /nope/missing {}", target.display()),
    )
    .await;
    match failure_source(&outcome) {
        Error::Transfer { source, .. } => assert!(source.is_not_found()),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!target.exists());
}

#[tokio::test]
async fn test_download_directory_is_rejected() {
    let (engine, memory) = single_host();
    memory.write_file("/etc/app/config.yml", "key: value\n");
    let dir = TempDir::new().unwrap();

    let outcome = run_one(
        &engine,
        &format!("fleet.download /etc/app {}", dir.path().join("app").display()),
    )
    .await;
    assert!(matches!(failure_source(&outcome), Error::Configuration(_)));
}

#[tokio::test]
async fn test_upload_of_directory_is_rejected() {
    let (engine, memory) = single_host();
    let dir = TempDir::new().unwrap();

    let outcome = run_one(&engine, &format!("fleet.upload {} /srv/dir", dir.path().display())).await;
    assert!(matches!(failure_source(&outcome), Error::Configuration(_)));
    assert!(!memory.has_file("/srv/dir"));
}

#[tokio::test]
async fn test_wrong_argument_count() {
    let (engine, memory) = single_host();

    let report = engine
        .execute(&["fleet.upload only-one", "fleet.mkdir"])
        .await
        .unwrap();
    let outcome = report.outcome("a").unwrap();
    assert_eq!(outcome.failed_command.as_deref(), Some("fleet.upload only-one"));
    match failure_source(outcome) {
        Error::Configuration(message) => assert!(message.contains("expects 2 argument(s), got 1")),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(memory.executions().is_empty());
}

#[tokio::test]
async fn test_upload_bytes_handler() {
    let (engine, memory) = single_host();
    engine
        .registry()
        .register("motd", Arc::new(UploadBytes::new("welcome\n", "/etc/motd")))
        .unwrap();

    let outcome = run_one(&engine, "fleet.motd").await;
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(memory.read_file("/etc/motd").unwrap(), b"welcome\n".to_vec());

    let rejected = run_one(&engine, "fleet.motd extra").await;
    assert!(matches!(failure_source(&rejected), Error::Configuration(_)));
}

#[tokio::test]
async fn test_cancelled_upload_removes_partial_remote_file() {
    let (engine, memory) = single_host();
    memory.set_transfer_pacing(Some(Duration::from_millis(10)));
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("large.bin");
    std::fs::write(&source, vec![3u8; 64 * 1024]).unwrap();

    let cancel = CancellationToken::new();
    let trigger = {
        let memory = Arc::clone(&memory);
        cancel_when(&cancel, move || memory.has_file("/srv/large.bin"))
    };
    let command = format!("fleet.upload {} /srv/large.bin", source.display());
    let report = tokio::time::timeout(
        Duration::from_secs(2),
        engine.execute_with_cancel(&[command.as_str()], &cancel),
    )
    .await
    .expect("cancelled upload did not return")
    .unwrap();
    trigger.await.unwrap();

    let outcome = report.outcome("a").unwrap();
    assert!(matches!(outcome.error.as_deref(), Some(Error::Cancelled)), "{:?}", outcome.error);
    assert!(!memory.has_file("/srv/large.bin"));

    memory.set_transfer_pacing(None);
    let retry = run_one(&engine, &command).await;
    assert!(retry.is_success(), "{:?}", retry.error);
    assert_eq!(memory.read_file("/srv/large.bin").unwrap().len(), 64 * 1024);
}

#[tokio::test]
async fn test_cancelled_download_removes_partial_local_file() {
    let (engine, memory) = single_host();
    memory.write_file("/srv/large.bin", vec![5u8; 64 * 1024]);
    memory.set_transfer_pacing(Some(Duration::from_millis(10)));
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("large.bin");

    let cancel = CancellationToken::new();
    let trigger = {
        let target = target.clone();
        cancel_when(&cancel, move || Path::new(&target).exists())
    };
    let command = format!("fleet.download /srv/large.bin {}", target.display());
    let report = tokio::time::timeout(
        Duration::from_secs(2),
        engine.execute_with_cancel(&[command.as_str()], &cancel),
    )
    .await
    .expect("cancelled download did not return")
    .unwrap();
    trigger.await.unwrap();

    let outcome = report.outcome("a").unwrap();
    assert!(matches!(outcome.error.as_deref(), Some(Error::Cancelled)), "{:?}", outcome.error);
    assert!(!target.exists());
}
