//! # Scheduler
//!
//! Boot sequence and the top-level telemetry loop.
//!
//! ## States
//!
//! ```text
//! BOOT ──load secrets──▶ CONFIGURED ──attach Wi-Fi──▶ ONLINE
//!   │
//!   └─ missing/malformed secrets ──▶ HALT
//!
//! ONLINE: SAMPLE ──valid fix──▶ PUBLISH ──▶ COOLDOWN ──▶ SAMPLE
//!            ▲  │
//!            └──┘ no fix / invalid fix
//! ```
//!
//! Each iteration runs at most one sample, one token renewal and one uplink
//! POST, in that order. The cooldown follows every publish attempt whatever
//! its outcome.

use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Configuration;
use crate::device::SystemProbe;
use crate::error::{Result, TelemetryNodeError};
use crate::gps::{GpsSampler, NmeaDecoder};
use crate::progress::Spinner;
use crate::serial::SerialPortIO;
use crate::telemetry::build_message;
use crate::uplink::{Publisher, UplinkOutcome};
use crate::wifi::{self, WifiLink};

/// Default pause after each publish attempt
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(5000);

/// Node lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Boot,
    Configured,
    Online,
    Halt,
}

/// Result of the boot sequence
#[derive(Debug)]
pub enum BootOutcome {
    /// Secrets loaded and link attached
    Online(Configuration),
    /// Secrets unusable; the node must not attach, sample or publish
    Halted(TelemetryNodeError),
}

impl BootOutcome {
    pub fn state(&self) -> NodeState {
        match self {
            BootOutcome::Online(_) => NodeState::Online,
            BootOutcome::Halted(_) => NodeState::Halt,
        }
    }
}

/// Result of one loop iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The window closed without a valid location
    NoFix,
    /// The decoder reported a location that fails validation
    InvalidFix,
    /// A document was built and a publish was attempted
    Published(UplinkOutcome),
}

fn enter(state: NodeState) {
    debug!("Node state: {:?}", state);
}

/// Load secrets and bring the Wi-Fi link up
///
/// A missing or malformed secrets file halts the node before the link is
/// touched.
///
/// # Errors
///
/// Returns error if the secrets file exists but cannot be read, or if
/// association cannot be started
pub async fn bootstrap<L: WifiLink + ?Sized>(
    secrets_path: &Path,
    link: &mut L,
    spinner: &mut Spinner,
    attach_poll: Duration,
) -> Result<BootOutcome> {
    enter(NodeState::Boot);

    let configuration = match Configuration::load(secrets_path) {
        Ok(configuration) => configuration,
        Err(e) if e.is_config_error() => {
            error!("Telemetry halted: {}", e);
            enter(NodeState::Halt);
            return Ok(BootOutcome::Halted(e));
        }
        Err(e) => return Err(e),
    };
    enter(NodeState::Configured);

    wifi::attach(link, &configuration.network, spinner, attach_poll).await?;
    enter(NodeState::Online);

    Ok(BootOutcome::Online(configuration))
}

/// Top-level loop of an online node
pub struct Scheduler<P, D, L, S>
where
    P: SerialPortIO,
    D: NmeaDecoder,
    L: WifiLink,
    S: SystemProbe + Sync,
{
    sampler: GpsSampler<P, D>,
    link: L,
    probe: S,
    publisher: Publisher,
    cooldown: Duration,
    iterations: u64,
    published: u64,
}

impl<P, D, L, S> Scheduler<P, D, L, S>
where
    P: SerialPortIO,
    D: NmeaDecoder,
    L: WifiLink,
    S: SystemProbe + Sync,
{
    pub fn new(sampler: GpsSampler<P, D>, link: L, probe: S, publisher: Publisher) -> Self {
        Self {
            sampler,
            link,
            probe,
            publisher,
            cooldown: DEFAULT_COOLDOWN,
            iterations: 0,
            published: 0,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Run one SAMPLE, and if a valid fix was found, PUBLISH and COOLDOWN
    pub async fn run_iteration(&mut self) -> IterationOutcome {
        self.iterations += 1;

        let Some(fix) = self.sampler.sample_once().await else {
            return IterationOutcome::NoFix;
        };

        if !fix.is_valid() {
            warn!(
                "Discarding invalid fix (lat={}, lon={}, utc={:?})",
                fix.latitude, fix.longitude, fix.utc
            );
            return IterationOutcome::InvalidFix;
        }

        let runtime = self.probe.runtime_info().await;
        let link = self.link.link_info().await;
        let Some(message) = build_message(&runtime, &link, &fix) else {
            return IterationOutcome::InvalidFix;
        };

        info!(
            "Fix {:.6},{:.6} ({} satellites), publishing",
            fix.latitude, fix.longitude, fix.satellites
        );
        let outcome = self.publisher.publish(&message).await;
        if outcome.is_ok() {
            self.published += 1;
        }

        tokio::time::sleep(self.cooldown).await;
        IterationOutcome::Published(outcome)
    }

    /// Loop forever; cancel by dropping the future
    pub async fn run(&mut self) {
        info!("Telemetry loop started");
        loop {
            let outcome = self.run_iteration().await;
            debug!("Iteration {}: {:?}", self.iterations, outcome);
        }
    }

    /// Iterations started so far
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Documents accepted by the endpoint so far
    pub fn published(&self) -> u64 {
        self.published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenCache;
    use crate::config::AuthCredentials;
    use crate::device::{MockSystemProbe, RuntimeInfo};
    use crate::gps::mocks::MockDecoder;
    use crate::gps::Fix;
    use crate::http::mocks::MockTransport;
    use crate::serial::port_trait::mocks::MockSerialPort;
    use crate::wifi::mocks::MockWifiLink;
    use chrono::NaiveDate;
    use serde_json::Value;
    use std::io;
    use std::io::Write;
    use std::sync::Arc;
    use tokio::time::Instant;

    const TOKEN_URI: &str = "https://login.example.com/tenant/oauth2/token";
    const ENDPOINT: &str = "https://bus.example.com/telemetry/messages";
    const TOKEN_ABC_120: &str = r#"{"access_token":"ABC","expires_in":120}"#;

    type TestScheduler = Scheduler<MockSerialPort, MockDecoder, MockWifiLink, MockSystemProbe>;

    fn good_fix() -> Fix {
        Fix {
            latitude: -23.5505,
            longitude: -46.6333,
            altitude_m: 760.2,
            speed_kmph: 23.15,
            course_deg: 87.3,
            satellites: 9,
            hdop: 0.9,
            utc: NaiveDate::from_ymd_opt(2024, 5, 1).and_then(|d| d.and_hms_opt(18, 0, 10)),
            location_valid: true,
        }
    }

    fn probe() -> MockSystemProbe {
        let mut probe = MockSystemProbe::new();
        probe.expect_runtime_info().returning(|| RuntimeInfo {
            chip_model: 0xd08,
            num_of_cores: 4,
            sdk_version: "6.1.0".to_string(),
            ..RuntimeInfo::default()
        });
        probe
    }

    /// Scheduler whose receiver delivers one sentence per scripted fix
    fn scheduler(transport: &Arc<MockTransport>, fixes: Vec<Fix>) -> TestScheduler {
        let port = MockSerialPort::new();
        for _ in &fixes {
            port.push_data(Duration::ZERO, b"$GPRMC\r\n");
        }
        let sampler = GpsSampler::new(port, MockDecoder::new(fixes), Spinner::new(io::sink()));

        let credentials = AuthCredentials {
            client_id: "node-42".to_string(),
            client_secret: "s3cr3t".to_string(),
            resource: "https://servicebus.azure.net".to_string(),
            token_endpoint_uri: TOKEN_URI.to_string(),
        };
        let tokens = TokenCache::new(transport.clone(), credentials);
        let publisher = Publisher::new(transport.clone(), tokens, ENDPOINT);

        Scheduler::new(sampler, MockWifiLink::new(0), probe(), publisher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_publishes_then_reuses_token() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(TOKEN_URI, 200, r#"{"access_token":"ABC","expires_in":3600}"#);
        transport.respond(ENDPOINT, 201, "");
        transport.respond(ENDPOINT, 201, "");
        let mut scheduler = scheduler(&transport, vec![good_fix(), good_fix()]);

        let start = Instant::now();
        let outcome = scheduler.run_iteration().await;
        assert_eq!(outcome, IterationOutcome::Published(UplinkOutcome::Ok(201)));
        assert_eq!(start.elapsed(), DEFAULT_COOLDOWN);

        let uplinks = transport.requests_to(ENDPOINT);
        assert_eq!(transport.requests_to(TOKEN_URI).len(), 1);
        assert_eq!(uplinks.len(), 1);
        assert_eq!(uplinks[0].headers.get("Authorization").map(String::as_str), Some("Bearer ABC"));

        let body: Value = serde_json::from_slice(&uplinks[0].body).unwrap();
        assert_eq!(body["gpsData"]["dateTime"], "2024-05-01T15:00:10-03:00");
        assert_eq!(body["gpsData"]["satellites"], 9);
        assert_eq!(body["device"]["ipAdress"], "192.168.4.23");
        assert_eq!(body["device"]["chipModel"], 0xd08);

        assert_eq!(scheduler.run_iteration().await, IterationOutcome::Published(UplinkOutcome::Ok(201)));
        assert_eq!(transport.requests_to(TOKEN_URI).len(), 1);
        assert_eq!(transport.requests_to(ENDPOINT).len(), 2);
        assert_eq!(scheduler.published(), 2);
        assert_eq!(scheduler.iterations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_fix_sends_nothing() {
        let transport = Arc::new(MockTransport::new());
        let out_of_range = Fix { latitude: 95.0, ..good_fix() };
        let no_time = Fix { utc: None, ..good_fix() };
        let mut scheduler = scheduler(&transport, vec![out_of_range, no_time]);

        let start = Instant::now();
        assert_eq!(scheduler.run_iteration().await, IterationOutcome::InvalidFix);
        assert_eq!(scheduler.run_iteration().await, IterationOutcome::InvalidFix);

        assert_eq!(transport.request_count(), 0);
        // No cooldown without a publish attempt
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_receiver_sends_nothing() {
        let transport = Arc::new(MockTransport::new());
        let mut scheduler = scheduler(&transport, vec![]);

        let start = Instant::now();
        assert_eq!(scheduler.run_iteration().await, IterationOutcome::NoFix);
        assert_eq!(start.elapsed(), crate::gps::sampler::DEFAULT_WINDOW);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_renewed_near_expiry() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(TOKEN_URI, 200, TOKEN_ABC_120);
        transport.respond(TOKEN_URI, 200, r#"{"access_token":"XYZ","expires_in":120}"#);
        for _ in 0..3 {
            transport.respond(ENDPOINT, 200, "");
        }
        let mut scheduler = scheduler(&transport, vec![good_fix(); 3]);

        let start = Instant::now();
        scheduler.run_iteration().await;
        scheduler.run_iteration().await;
        assert_eq!(transport.requests_to(TOKEN_URI).len(), 1);

        // t = 65 s, past expiry minus the 60 s margin
        tokio::time::advance(Duration::from_secs(55)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(65));
        scheduler.run_iteration().await;

        assert_eq!(transport.requests_to(TOKEN_URI).len(), 2);
        let uplinks = transport.requests_to(ENDPOINT);
        assert_eq!(uplinks[2].headers.get("Authorization").map(String::as_str), Some("Bearer XYZ"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_falls_back_to_valid_token() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(TOKEN_URI, 200, TOKEN_ABC_120);
        transport.respond(TOKEN_URI, 500, "internal error");
        transport.respond(ENDPOINT, 200, "");
        transport.respond(ENDPOINT, 200, "");
        let mut scheduler = scheduler(&transport, vec![good_fix(); 2]);

        scheduler.run_iteration().await;
        tokio::time::advance(Duration::from_secs(60)).await;

        let outcome = scheduler.run_iteration().await;
        assert_eq!(outcome, IterationOutcome::Published(UplinkOutcome::Ok(200)));

        let uplinks = transport.requests_to(ENDPOINT);
        assert_eq!(uplinks.len(), 2);
        assert_eq!(uplinks[1].headers.get("Authorization").map(String::as_str), Some("Bearer ABC"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_without_token_is_unauthenticated() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(TOKEN_URI, 500, "internal error");
        let mut scheduler = scheduler(&transport, vec![good_fix()]);

        let start = Instant::now();
        let outcome = scheduler.run_iteration().await;

        assert_eq!(outcome, IterationOutcome::Published(UplinkOutcome::Unauthenticated));
        assert!(transport.requests_to(ENDPOINT).is_empty());
        assert_eq!(start.elapsed(), DEFAULT_COOLDOWN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_drops_fix_and_cools_down() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(TOKEN_URI, 200, TOKEN_ABC_120);
        transport.respond(ENDPOINT, 401, "expired");
        transport.respond(TOKEN_URI, 200, r#"{"access_token":"DEF","expires_in":120}"#);
        transport.respond(ENDPOINT, 200, "");
        let mut scheduler = scheduler(&transport, vec![good_fix(); 2]);

        let start = Instant::now();
        let outcome = scheduler.run_iteration().await;
        assert_eq!(outcome, IterationOutcome::Published(UplinkOutcome::Unauthorized(401)));
        assert_eq!(start.elapsed(), DEFAULT_COOLDOWN);
        assert_eq!(transport.requests_to(ENDPOINT).len(), 1);
        assert_eq!(scheduler.published(), 0);

        // The next iteration renews and carries a new fix only
        scheduler.run_iteration().await;
        let uplinks = transport.requests_to(ENDPOINT);
        assert_eq!(uplinks.len(), 2);
        assert_eq!(uplinks[1].headers.get("Authorization").map(String::as_str), Some("Bearer DEF"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_cooldown() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(TOKEN_URI, 200, TOKEN_ABC_120);
        transport.respond(ENDPOINT, 200, "");
        let mut scheduler =
            scheduler(&transport, vec![good_fix()]).with_cooldown(Duration::from_millis(250));

        let start = Instant::now();
        scheduler.run_iteration().await;
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_secrets_halts_before_attach() {
        let dir = tempfile::tempdir().unwrap();
        let mut link = MockWifiLink::new(0);
        let mut spinner = Spinner::new(io::sink());

        let outcome = tokio_test::assert_ok!(
            bootstrap(&dir.path().join("secrets.json"), &mut link, &mut spinner, wifi::DEFAULT_ATTACH_POLL)
                .await
        );

        assert_eq!(outcome.state(), NodeState::Halt);
        assert!(matches!(outcome, BootOutcome::Halted(TelemetryNodeError::ConfigMissing(_))));
        assert_eq!(link.begin_count(), 0);
        assert_eq!(*link.status_calls.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_secrets_halts_before_attach() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"Network":{"Ssid":"fleet-ap"}}"#).unwrap();
        let mut link = MockWifiLink::new(0);
        let mut spinner = Spinner::new(io::sink());

        let outcome = tokio_test::assert_ok!(
            bootstrap(file.path(), &mut link, &mut spinner, wifi::DEFAULT_ATTACH_POLL).await
        );

        assert!(matches!(outcome, BootOutcome::Halted(TelemetryNodeError::ConfigMalformed(_))));
        assert_eq!(link.begin_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_attaches_with_loaded_credentials() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"{
                "Authentication": {"ClientId":"node-42","ClientSecret":"s3cr3t","Resource":"https://servicebus.azure.net","Uri":"https://login.example.com/tenant/oauth2/token"},
                "ServiceBus": {"ConnectionString":"https://bus.example.com/telemetry/messages"},
                "Network": {"Ssid":"fleet-ap","Password":"hunter22"}
            }"#,
        )
        .unwrap();
        let mut link = MockWifiLink::new(3);
        let mut spinner = Spinner::new(io::sink());

        let start = Instant::now();
        let outcome = tokio_test::assert_ok!(
            bootstrap(file.path(), &mut link, &mut spinner, wifi::DEFAULT_ATTACH_POLL).await
        );

        assert_eq!(outcome.state(), NodeState::Online);
        let BootOutcome::Online(configuration) = outcome else {
            panic!("expected an online node");
        };
        assert_eq!(configuration.endpoint_uri, ENDPOINT);
        assert_eq!(link.begin_calls.lock().unwrap().as_slice(), ["fleet-ap".to_string()]);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_failure_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"{
                "Authentication": {"ClientId":"a","ClientSecret":"b","Resource":"c","Uri":"https://login.example.com/token"},
                "ServiceBus": {"ConnectionString":"https://bus.example.com/messages"},
                "Network": {"Ssid":"fleet-ap","Password":"hunter22"}
            }"#,
        )
        .unwrap();
        let mut link = MockWifiLink::new(0);
        link.set_begin_error("nmcli not installed");
        let mut spinner = Spinner::new(io::sink());

        let result = bootstrap(file.path(), &mut link, &mut spinner, wifi::DEFAULT_ATTACH_POLL).await;
        assert!(matches!(result, Err(TelemetryNodeError::Wifi(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_secrets_is_an_error_not_a_halt() {
        // A directory exists at the path but cannot be read as a file
        let dir = tempfile::tempdir().unwrap();
        let mut link = MockWifiLink::new(0);
        let mut spinner = Spinner::new(io::sink());

        let result = bootstrap(dir.path(), &mut link, &mut spinner, wifi::DEFAULT_ATTACH_POLL).await;

        assert!(matches!(result, Err(TelemetryNodeError::Io(_))));
        assert_eq!(link.begin_count(), 0);
    }
}
