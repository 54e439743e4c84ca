//! Controller facade
//!
//! Wraps a [`Connection`] with controller-level lifecycle events and the
//! discovery helpers a host application uses to find zones, sources and
//! tuner presets.

use std::fmt;

use parking_lot::Mutex;

use crate::connection::Connection;
use crate::error::Result;
use crate::protocol::{Command, Target};
use crate::state::{EventBus, Handler, RioEvent, Signal, Subscription};
use crate::types::{BANKS_PER_SOURCE, PRESETS_PER_BANK, PresetId, RioConfig, SourceId, ZoneId};

#[cfg(test)]
mod tests;

/// Highest controller index scanned by [`Controller::enumerate_zones`]
pub const MAX_CONTROLLERS: u32 = 7;
/// Zones scanned per controller
pub const ZONES_PER_CONTROLLER: u32 = 16;
/// Highest source index scanned
pub const MAX_SOURCES: u32 = 16;
/// Source type that carries tuner presets
pub const TUNER_SOURCE_TYPE: &str = "RNET AM/FM Tuner (Internal)";

/// A zone found by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneInfo {
    /// Zone identifier
    pub id: ZoneId,
    /// Configured zone name
    pub name: String,
}

/// A source found by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Source identifier
    pub id: SourceId,
    /// Configured source name
    pub name: String,
    /// Source type as reported by the controller
    pub source_type: String,
}

/// A valid tuner preset found by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetInfo {
    /// Preset identifier
    pub id: PresetId,
    /// Flat index across banks, see [`Controller::preset_index`]
    pub index: u32,
    /// Preset name
    pub name: String,
}

/// A Russound controller reached over RIO
///
/// # Example
///
/// ```rust,no_run
/// use russound_rio::{Controller, EventBus, RioConfig};
///
/// # async fn example() -> Result<(), russound_rio::RioError> {
/// let controller = Controller::new(RioConfig::builder("192.168.1.50").build(), EventBus::current());
/// controller.connect().await?;
///
/// for zone in controller.enumerate_zones().await? {
///     controller.connection().watch_zone(zone.id).await?;
///     println!("{}: {}", zone.id, zone.name);
/// }
///
/// controller.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct Controller {
    config: RioConfig,
    bus: EventBus,
    connection: Connection,
    subscription: Mutex<Option<Subscription>>,
}

impl Controller {
    /// Create a controller; nothing is opened until [`connect`](Self::connect)
    #[must_use]
    pub fn new(config: RioConfig, bus: EventBus) -> Self {
        Self {
            connection: Connection::new(bus.clone()),
            config,
            bus,
            subscription: Mutex::new(None),
        }
    }

    /// Underlying connection
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Event bus shared with the connection
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Controller configuration
    #[must_use]
    pub fn config(&self) -> &RioConfig {
        &self.config
    }

    /// Check if the connection is up
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Check if the connection is being re-established
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.connection.is_reconnecting()
    }

    /// Connect and start relaying connection events as controller events
    ///
    /// # Errors
    ///
    /// Returns the connection error when `auto_reconnect` is off and the
    /// attempt fails.
    pub async fn connect(&self) -> Result<()> {
        if self.connection.is_connected() {
            return Ok(());
        }

        {
            let mut subscription = self.subscription.lock();
            if subscription.is_none() {
                let bus = self.bus.clone();
                *subscription = Some(self.bus.subscribe(
                    Signal::Connection,
                    Handler::immediate(move |event| relay(&bus, event)),
                ));
            }
        }

        let result = self.connection.connect(self.config.clone()).await;
        if result.is_err() {
            self.unsubscribe();
        }
        tracing::debug!(host = %self.config.host, ok = result.is_ok(), "Controller connect");
        result
    }

    /// Disconnect and stop relaying events
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
        self.unsubscribe();
    }

    fn unsubscribe(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
    }

    /// Amplifier model reported by the first controller
    ///
    /// # Errors
    ///
    /// Returns an error if the `GET` fails.
    pub async fn amplifier_model(&self) -> Result<String> {
        self.connection
            .send(&Command::get(Target::Controller(1), "type"))
            .await
    }

    /// Flat preset index: `(bank - 1) * 6 + preset`
    #[must_use]
    pub fn preset_index(bank: u32, preset: u32) -> u32 {
        PresetId::flat_index(bank, preset)
    }

    /// Zones with a non-empty name
    ///
    /// A command error ends the scan of that controller.
    ///
    /// # Errors
    ///
    /// Returns transport errors; command errors are not errors here.
    pub async fn enumerate_zones(&self) -> Result<Vec<ZoneInfo>> {
        let mut zones = Vec::new();
        for controller in 1..=MAX_CONTROLLERS {
            for zone in 1..=ZONES_PER_CONTROLLER {
                let id = ZoneId::new(controller, zone)?;
                match self.connection.get_zone_variable(id, "name").await {
                    Ok(name) if !name.is_empty() => zones.push(ZoneInfo { id, name }),
                    Ok(_) => {}
                    Err(err) if err.is_command_error() => break,
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(zones)
    }

    /// Sources with a non-empty name and type
    ///
    /// A command error ends the scan.
    ///
    /// # Errors
    ///
    /// Returns transport errors; command errors are not errors here.
    pub async fn enumerate_sources(&self) -> Result<Vec<SourceInfo>> {
        let mut sources = Vec::new();
        for source in 1..=MAX_SOURCES {
            let id = SourceId::new(source)?;
            match self.source_info(id).await {
                Ok(Some(info)) => sources.push(info),
                Ok(None) => {}
                Err(err) if err.is_command_error() => break,
                Err(err) => return Err(err),
            }
        }
        Ok(sources)
    }

    /// Valid presets of every tuner source
    ///
    /// A command error ends the scan.
    ///
    /// # Errors
    ///
    /// Returns transport errors; command errors are not errors here.
    pub async fn enumerate_presets(&self) -> Result<Vec<PresetInfo>> {
        let mut presets = Vec::new();
        for source in 1..=MAX_SOURCES {
            let id = SourceId::new(source)?;
            match self.tuner_presets(id, &mut presets).await {
                Ok(()) => {}
                Err(err) if err.is_command_error() => break,
                Err(err) => return Err(err),
            }
        }
        Ok(presets)
    }

    async fn source_info(&self, id: SourceId) -> Result<Option<SourceInfo>> {
        let name = self.connection.get_source_variable(id, "name").await?;
        let source_type = self.connection.get_source_variable(id, "type").await?;
        if name.is_empty() || source_type.is_empty() {
            return Ok(None);
        }
        Ok(Some(SourceInfo {
            id,
            name,
            source_type,
        }))
    }

    async fn tuner_presets(&self, source: SourceId, out: &mut Vec<PresetInfo>) -> Result<()> {
        let Some(info) = self.source_info(source).await? else {
            return Ok(());
        };
        if info.source_type != TUNER_SOURCE_TYPE {
            return Ok(());
        }

        for bank in 1..=BANKS_PER_SOURCE {
            for preset in 1..=PRESETS_PER_BANK {
                let id = PresetId::new(source.get(), bank, preset)?;
                let name = self.connection.get_preset_variable(id, "name").await?;
                let valid = self.connection.get_preset_variable(id, "valid").await?;
                if valid == "TRUE" {
                    out.push(PresetInfo {
                        id,
                        index: Self::preset_index(bank, preset),
                        name,
                    });
                }
            }
        }
        Ok(())
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        // The relay handler holds a clone of the bus
        self.unsubscribe();
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("state", &self.connection.state())
            .finish_non_exhaustive()
    }
}

/// Republish connection lifecycle as controller lifecycle
fn relay(bus: &EventBus, event: &RioEvent) {
    let forwarded = match event {
        RioEvent::Connected => RioEvent::ControllerConnected,
        RioEvent::Disconnected { .. } => RioEvent::ControllerDisconnected,
        _ => return,
    };
    bus.publish(Signal::Controller, forwarded);
}
