use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use herald_broadcast::{
    BroadcastError, BroadcastSupervisor, DeliveryChannel, DeliveryOutcome, PacingPolicy,
    StatusMessage, SupervisorConfig,
};
use herald_directory::{open_user_directory, DirectoryBackend, UserDirectory};
use tokio::sync::Mutex as AsyncMutex;

const ADMIN: i64 = 7;

struct ScriptedChannel {
    outcomes: HashMap<i64, DeliveryOutcome>,
    sent: Mutex<Vec<(i64, String)>>,
}

impl ScriptedChannel {
    fn new(outcomes: Vec<(i64, DeliveryOutcome)>) -> Self {
        Self {
            outcomes: outcomes.into_iter().collect(),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent_ids(&self) -> Vec<i64> {
        self.sent
            .lock()
            .expect("sent lock")
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }
}

#[async_trait]
impl DeliveryChannel for ScriptedChannel {
    async fn send(&self, recipient_id: i64, body: &str) -> DeliveryOutcome {
        self.sent
            .lock()
            .expect("sent lock")
            .push((recipient_id, body.to_string()));
        self.outcomes
            .get(&recipient_id)
            .cloned()
            .unwrap_or(DeliveryOutcome::Delivered)
    }
}

#[derive(Default)]
struct RecordingStatus {
    updates: AsyncMutex<Vec<String>>,
}

impl RecordingStatus {
    async fn last(&self) -> String {
        self.updates.lock().await.last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl StatusMessage for RecordingStatus {
    async fn update(&self, text: &str) -> anyhow::Result<()> {
        self.updates.lock().await.push(text.to_string());
        Ok(())
    }
}

async fn register_fixture_users(directory: &dyn UserDirectory) {
    assert!(directory
        .upsert_if_absent(101, Some("alice"), "Alice")
        .await
        .expect("insert alice"));
    assert!(directory
        .upsert_if_absent(102, None, "Bob")
        .await
        .expect("insert bob"));
    assert!(directory
        .upsert_if_absent(103, Some("carol"), "Carol")
        .await
        .expect("insert carol"));
    assert!(!directory
        .upsert_if_absent(101, Some("alice_renamed"), "Alice Again")
        .await
        .expect("duplicate alice"));
}

fn supervisor_for(
    directory: Arc<dyn UserDirectory>,
    channel: Arc<ScriptedChannel>,
) -> BroadcastSupervisor {
    BroadcastSupervisor::new(
        SupervisorConfig {
            admin_id: ADMIN,
            pacing: PacingPolicy {
                send_interval: Duration::from_millis(100),
                report_every: 2,
                delivery_timeout: None,
            },
        },
        directory,
        channel,
    )
}

#[tokio::test(start_paused = true)]
async fn integration_json_directory_registrations_reach_every_recipient_after_reopen() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let backend = DirectoryBackend::JsonFile(workspace.path().join("users.json"));
    {
        let directory = open_user_directory(&backend).expect("open json directory");
        register_fixture_users(directory.as_ref()).await;
    }

    let directory = open_user_directory(&backend).expect("reopen json directory");
    assert_eq!(directory.count().await.expect("count"), 3);

    let channel = Arc::new(ScriptedChannel::new(vec![(
        102,
        DeliveryOutcome::unreachable("Forbidden: bot was blocked by the user"),
    )]));
    let supervisor = supervisor_for(directory, channel.clone());
    let status = Arc::new(RecordingStatus::default());

    let receipt = supervisor
        .start(ADMIN, "Maintenance tonight at 22:00", status.clone())
        .await
        .expect("start broadcast");
    assert_eq!(receipt.total, 3);
    supervisor.wait_idle().await;

    assert_eq!(channel.sent_ids(), vec![101, 102, 103]);
    let report = status.last().await;
    assert!(report.starts_with("🎉 Broadcast Completed!"));
    assert!(report.contains("✅ Successful: 2"));
    assert!(report.contains("❌ Failed: 1"));
    assert!(report.contains("1. Bob (N/A) [unreachable]"));
    assert!(matches!(
        supervisor.status(ADMIN),
        Err(BroadcastError::NotRunning)
    ));
}

#[tokio::test(start_paused = true)]
async fn integration_sqlite_directory_feeds_supervisor_and_frees_slot_for_next_campaign() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let backend = DirectoryBackend::Sqlite(workspace.path().join("users.sqlite3"));
    let directory = open_user_directory(&backend).expect("open sqlite directory");
    register_fixture_users(directory.as_ref()).await;

    let channel = Arc::new(ScriptedChannel::new(Vec::new()));
    let supervisor = supervisor_for(directory, channel.clone());

    let first = Arc::new(RecordingStatus::default());
    supervisor
        .start(ADMIN, "first", first.clone())
        .await
        .expect("first broadcast");
    assert!(matches!(
        supervisor
            .start(ADMIN, "second", Arc::new(RecordingStatus::default()))
            .await,
        Err(BroadcastError::AlreadyRunning)
    ));
    supervisor.wait_idle().await;
    assert!(first.last().await.contains("📈 Success Rate: 100.0%"));

    let second = Arc::new(RecordingStatus::default());
    supervisor
        .start(ADMIN, "second", second.clone())
        .await
        .expect("slot is free again");
    supervisor.wait_idle().await;

    assert_eq!(channel.sent_ids(), vec![101, 102, 103, 101, 102, 103]);
    assert!(second.last().await.starts_with("🎉 Broadcast Completed!"));
}
