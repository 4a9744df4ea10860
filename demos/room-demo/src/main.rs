use roomkeeper::prelude::*;
use roomkeeper::telemetry;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Signs everyone in as the user named by the hint. Development only.
struct DevProvider;

impl IdentityProvider for DevProvider {
    async fn restore(&self) -> Result<Option<Session>, SessionError> {
        Ok(None)
    }

    async fn sign_in(&self, provider_hint: &str) -> Result<Session, SessionError> {
        let user_id =
            UserId::new(provider_hint).map_err(|e| SessionError::AuthFailed(e.to_string()))?;
        Ok(Session::new(user_id, provider_hint.to_uppercase())
            .with_email(format!("{provider_hint}@example.com")))
    }

    async fn sign_out(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

type DemoClient = RoomClient<DevProvider, MemoryConnection, MemoryRecordStore>;

const CONFIG: &str = r#"{
    "lifecycle": { "grace_period": { "secs": 1, "nanos": 0 } }
}"#;

struct Demo {
    store: MemoryRealtimeStore,
    records: Arc<MemoryRecordStore>,
    config: RoomkeeperConfig,
    events: mpsc::UnboundedReceiver<LifecycleEvent>,
    events_tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl Demo {
    fn new(config: RoomkeeperConfig) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        Self {
            store: MemoryRealtimeStore::new(),
            records: Arc::new(MemoryRecordStore::new()),
            config,
            events,
            events_tx,
        }
    }

    /// Opens a connection for `user` and signs them in.
    async fn sign_in(&self, user: &str) -> Result<(DemoClient, Arc<MemoryConnection>), RoomkeeperError> {
        let conn = Arc::new(self.store.connect());
        let client = RoomClientBuilder::new()
            .config(self.config)
            .events(self.events_tx.clone())
            .build(DevProvider, Arc::clone(&conn), Arc::clone(&self.records))
            .await;
        client.init().await?;
        client.login(user).await?;
        Ok((client, conn))
    }

    async fn create_room(&self, room: &str, name: &str) -> Result<RoomId, RoomkeeperError> {
        let room_id = RoomId::new(room)?;
        self.records.put(RoomRecord::new(room_id.clone(), name, 0)).await?;
        Ok(room_id)
    }

    /// Drains lifecycle events for `wait`, logging each.
    async fn settle(&mut self, wait: Duration) {
        let deadline = tokio::time::Instant::now() + wait;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.events.recv()).await {
            tracing::info!(room_id = %event.room_id(), ?event, "lifecycle event");
        }
    }

    async fn report(&self, room_id: &RoomId) -> Result<(), RoomkeeperError> {
        let exists = self.records.exists(room_id).await?;
        tracing::info!(%room_id, exists, "room record");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), RoomkeeperError> {
    telemetry::init_tracing();

    let config = RoomkeeperConfig::from_json(CONFIG)?;
    let mut demo = Demo::new(config);
    let settle = config.lifecycle.grace_period * 3;

    // Last member's tab closes: the directive fires and the room goes.
    // Bob visited earlier, so his client is still watching the room.
    tracing::info!("--- scenario 1: last member disconnects ---");
    let r1 = demo.create_room("r1", "Standup").await?;
    let (ada, ada_conn) = demo.sign_in("ada").await?;
    let (bob, _bob_conn) = demo.sign_in("bob").await?;
    ada.enter_room(&r1).await?;
    bob.enter_room(&r1).await?;
    bob.leave_room(&r1).await?;
    ada_conn.disconnect();
    demo.settle(settle).await;
    demo.report(&r1).await?;

    // Someone stays behind: the room survives.
    tracing::info!("--- scenario 2: one member leaves, one stays ---");
    let r2 = demo.create_room("r2", "Retro").await?;
    let (cy, cy_conn) = demo.sign_in("cy").await?;
    bob.enter_room(&r2).await?;
    cy.enter_room(&r2).await?;
    bob.leave_room(&r2).await?;
    demo.settle(settle).await;
    let present = bob.presence_set(&r2).await?;
    tracing::info!(room_id = %r2, users = ?present.users(), "presence");
    demo.report(&r2).await?;

    // Page reload inside the grace period: the room is kept.
    tracing::info!("--- scenario 3: reload within grace ---");
    cy_conn.disconnect();
    let (cy_again, _cy_again_conn) = demo.sign_in("cy").await?;
    cy_again.enter_room(&r2).await?;
    demo.settle(settle).await;
    demo.report(&r2).await?;

    // The last member signs out properly.
    tracing::info!("--- scenario 4: logout empties the room ---");
    cy_again.logout().await?;
    demo.settle(settle).await;
    demo.report(&r2).await?;

    for client in [&ada, &bob, &cy, &cy_again] {
        client.shutdown().await;
    }
    Ok(())
}
