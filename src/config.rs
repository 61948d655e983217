//! config.rs
//! `systemconfig.json`: the system's identity, its gateway address and the
//! assets it hosts.
//!
//! Loading is all-or-nothing. A missing file is replaced by a template and
//! reported as an error so the operator edits it before the first real start.
//! Validation runs before anything is spawned.

use std::{
    collections::HashSet,
    fs,
    path::Path,
    time::Duration,
};

use log::info;
use serde::{Deserialize, Serialize};

use crate::asset::{
    signal::{CELSIUS, PERCENT},
    AssetProfile, ConsumedService, Details, ServiceDef,
};
use crate::bus::topic_details;
use crate::device::{
    onewire::W1_DEVICES, Actuator, CommandActuator, CommandSource, Normalizer, OneWireThermometer,
    RecordingActuator, SampleSource, SimulatedSource, SineSource, SysfsPwm,
};
use crate::error::ConfigError;
use crate::systems::{
    analog::AnalogTraits,
    leveler::{self, LevelerTraits},
    topic::TopicTraits,
    AnalogChannel, Leveler, Servo, Thermometer, TopicAsset,
};

pub const DEFAULT_CONFIG_PATH: &str = "systemconfig.json";

/// Accepted range for every sampling, control and generator period.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);
pub const MAX_PERIOD: Duration = Duration::from_secs(7 * 24 * 3600);

/// Seconds to a period inside [`MIN_PERIOD`, `MAX_PERIOD`], or `None`.
pub fn checked_period(seconds: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|period| (MIN_PERIOD..=MAX_PERIOD).contains(period))
}

/// Like [`checked_period`] but saturating; validated configs never saturate.
pub fn period_from_secs(seconds: f64) -> Duration {
    checked_period(seconds).unwrap_or(if seconds < MIN_PERIOD.as_secs_f64() {
        MIN_PERIOD
    } else {
        MAX_PERIOD
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_address")]
    pub address: String,
    pub port: u16,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    pub assets: Vec<AssetConfig>,
}

fn default_address() -> String {
    "0.0.0.0".into()
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}

fn default_mailbox_capacity() -> usize {
    16
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Optional for topic assets, whose name derives from the topic.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub details: Details,
    /// Empty means the kind's default services.
    #[serde(default)]
    pub services: Vec<ServiceDef>,
    #[serde(default)]
    pub consumed: Vec<ConsumedService>,
    #[serde(flatten)]
    pub kind: AssetKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetKind {
    Thermometer(ThermometerConfig),
    AnalogChannel(AnalogConfig),
    Servo(ServoConfig),
    Leveler(LevelerTraits),
    Topic(TopicConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThermometerConfig {
    #[serde(default = "two_seconds")]
    pub period_s: f64,
    pub source: SourceSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalogConfig {
    pub traits: AnalogTraits,
    #[serde(default = "one_second")]
    pub period_s: f64,
    pub source: SourceSpec,
    /// Absent for input-only channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ActuatorSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServoConfig {
    pub output: ActuatorSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicConfig {
    pub topic: String,
    #[serde(default)]
    pub pattern: Vec<String>,
    pub unit: String,
    /// Publishes generated values on the topic (test signal).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<GeneratorConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    #[serde(default = "one_second")]
    pub period_s: f64,
    pub source: SourceSpec,
}

fn one_second() -> f64 {
    1.0
}

fn two_seconds() -> f64 {
    2.0
}

/// Where samples come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "binding", rename_all = "snake_case")]
pub enum SourceSpec {
    OneWire {
        device: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        root: Option<String>,
    },
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Simulated {
        base: f64,
        #[serde(default)]
        noise: f64,
        #[serde(default, rename = "failEvery")]
        fail_every: u32,
    },
    Sine {
        amplitude: f64,
        offset: f64,
        #[serde(rename = "periodS")]
        period_s: f64,
    },
}

/// Where commands go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "binding", rename_all = "snake_case")]
pub enum ActuatorSpec {
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, rename = "releaseArgs", skip_serializing_if = "Option::is_none")]
        release_args: Option<Vec<String>>,
    },
    Pwm {
        channel: String,
        #[serde(default, rename = "periodUs", skip_serializing_if = "Option::is_none")]
        period_us: Option<u64>,
    },
    Simulated,
}

impl SourceSpec {
    pub fn build(&self) -> Box<dyn SampleSource> {
        match self {
            SourceSpec::OneWire { device, root } => Box::new(OneWireThermometer::new(
                root.as_deref().unwrap_or(W1_DEVICES),
                device,
            )),
            SourceSpec::Command { program, args } => Box::new(CommandSource::new(program, args.clone())),
            SourceSpec::Simulated {
                base,
                noise,
                fail_every,
            } => Box::new(SimulatedSource::new(*base, (-noise, *noise)).failing_every(*fail_every)),
            SourceSpec::Sine {
                amplitude,
                offset,
                period_s,
            } => Box::new(SineSource::new(*amplitude, *offset, *period_s)),
        }
    }
}

impl ActuatorSpec {
    pub fn build(&self) -> Box<dyn Actuator> {
        match self {
            ActuatorSpec::Command {
                program,
                args,
                release_args,
            } => {
                let actuator = CommandActuator::new(program, args.clone());
                match release_args {
                    Some(release) => Box::new(actuator.with_release(release.clone())),
                    None => Box::new(actuator),
                }
            }
            ActuatorSpec::Pwm { channel, period_us } => Box::new(SysfsPwm::new(channel, *period_us)),
            ActuatorSpec::Simulated => Box::new(RecordingActuator::new().0),
        }
    }
}

impl AssetConfig {
    /// Configured name, or the topic with `/` replaced by `_`.
    pub fn resolved_name(&self) -> String {
        match &self.kind {
            AssetKind::Topic(topic) if self.name.is_empty() => topic.topic.replace('/', "_"),
            _ => self.name.clone(),
        }
    }

    /// Services the kind offers when none are configured. Their sub-paths are
    /// the only ones the kind answers.
    fn default_services(&self) -> Result<Vec<ServiceDef>, ConfigError> {
        Ok(match &self.kind {
            AssetKind::Thermometer(_) => Thermometer::default_services(),
            AssetKind::AnalogChannel(_) => AnalogChannel::default_services(),
            AssetKind::Servo(_) => Servo::default_services(),
            AssetKind::Leveler(_) => Leveler::default_services(),
            AssetKind::Topic(topic) => {
                let (_, definition, _) = topic_details(&topic.topic, &topic.pattern)?;
                TopicAsset::default_services(&definition, &topic.unit)
            }
        })
    }

    /// Public metadata of the asset, defaults filled in.
    pub fn profile(&self) -> Result<AssetProfile, ConfigError> {
        let mut details = self.details.clone();
        let services = if self.services.is_empty() {
            self.default_services()?
        } else {
            self.services.clone()
        };

        if let AssetKind::Topic(topic) = &self.kind {
            let (topic_details, _, _) = topic_details(&topic.topic, &topic.pattern)?;
            for (key, values) in topic_details {
                details.entry(key).or_default().extend(values);
            }
        }

        Ok(AssetProfile {
            name: self.resolved_name(),
            details,
            services,
            consumed: self.consumed.clone(),
        })
    }

    /// Sampler unit and normalization for kinds that have a sampler.
    pub fn sampling(&self) -> Option<(Duration, &'static str, Normalizer, &SourceSpec)> {
        match &self.kind {
            AssetKind::Thermometer(t) => Some((
                period_from_secs(t.period_s),
                CELSIUS,
                Normalizer::Identity,
                &t.source,
            )),
            AssetKind::AnalogChannel(a) => Some((
                period_from_secs(a.period_s),
                PERCENT,
                Normalizer::Percent {
                    min: a.traits.min_value,
                    max: a.traits.max_value,
                },
                &a.source,
            )),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let name = self.resolved_name();
        if name.is_empty() {
            return Err(ConfigError::invalid("<unnamed>", "every asset needs a name"));
        }

        let profile = self.profile()?;
        let handled = self.default_services()?;
        let mut sub_paths = HashSet::new();
        for service in &profile.services {
            if !sub_paths.insert(service.sub_path.as_str()) {
                return Err(ConfigError::invalid(
                    &name,
                    format!("service path `{}` used twice", service.sub_path),
                ));
            }
            if !handled.iter().any(|h| h.sub_path == service.sub_path) {
                let known: Vec<&str> = handled.iter().map(|h| h.sub_path.as_str()).collect();
                return Err(ConfigError::invalid(
                    &name,
                    format!(
                        "service path `{}` is not served by this kind (expected one of {})",
                        service.sub_path,
                        known.join(", ")
                    ),
                ));
            }
        }

        let period = |seconds: f64, what: &str| match checked_period(seconds) {
            Some(_) => Ok(()),
            None => Err(ConfigError::invalid(
                &name,
                format!(
                    "{what} must be between {} and {} seconds, got {seconds}",
                    MIN_PERIOD.as_secs_f64(),
                    MAX_PERIOD.as_secs()
                ),
            )),
        };

        match &self.kind {
            AssetKind::Thermometer(t) => period(t.period_s, "periodS")?,
            AssetKind::AnalogChannel(a) => {
                period(a.period_s, "periodS")?;
                if a.traits.min_value >= a.traits.max_value {
                    return Err(ConfigError::invalid(&name, "minValue must be below maxValue"));
                }
            }
            AssetKind::Servo(_) => {}
            AssetKind::Leveler(l) => {
                period(l.period, "period")?;
                if !(l.lambda.is_finite() && l.lambda > 0.0) {
                    return Err(ConfigError::invalid(
                        &name,
                        format!("lambda must be > 0, got {}", l.lambda),
                    ));
                }
                if l.output_min >= l.output_max {
                    return Err(ConfigError::invalid(&name, "outputMin must be below outputMax"));
                }
                for definition in [leveler::UPSTREAM, leveler::DOWNSTREAM] {
                    if !self.consumed.iter().any(|c| c.definition == definition) {
                        return Err(ConfigError::invalid(
                            &name,
                            format!("no consumed `{definition}` service"),
                        ));
                    }
                }
            }
            AssetKind::Topic(t) => {
                if let Some(generator) = &t.generator {
                    period(generator.period_s, "generator periodS")?;
                    if let SourceSpec::Sine { period_s, .. } = generator.source {
                        period(period_s, "sine periodS")?;
                    }
                }
            }
        }

        if let Some((_, _, _, SourceSpec::Sine { period_s, .. })) = self.sampling() {
            period(*period_s, "sine periodS")?;
        }
        Ok(())
    }
}

impl TopicConfig {
    pub fn traits(&self) -> TopicTraits {
        TopicTraits {
            topic: self.topic.clone(),
            pattern: self.pattern.clone(),
            unit: self.unit.clone(),
        }
    }
}

impl SystemConfig {
    /// Reads and validates `path`. When the file does not exist a template is
    /// written there and [`ConfigError::TemplateWritten`] returned.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            let template = serde_json::to_string_pretty(&Self::template()).map_err(|source| {
                ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            fs::write(path, template).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            return Err(ConfigError::TemplateWritten(path.to_path_buf()));
        }

        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!(
            "loaded {} with {} assets from {}",
            config.name,
            config.assets.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::invalid(&self.name, "requestTimeoutMs must be > 0"));
        }
        let mut names = HashSet::new();
        for asset in &self.assets {
            asset.validate()?;
            let name = asset.resolved_name();
            if !names.insert(name.clone()) {
                return Err(ConfigError::DuplicateAsset(name));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// A runnable all-simulated level control rig.
    pub fn template() -> Self {
        let simulated_level = AssetConfig {
            name: "LevelSensor_1".into(),
            details: details(&[("Location", "Tank_1")]),
            services: vec![],
            consumed: vec![],
            kind: AssetKind::AnalogChannel(AnalogConfig {
                traits: AnalogTraits {
                    address: "InputValue_1".into(),
                    value: 0.0,
                    min_value: 0.0,
                    max_value: 10_000.0,
                },
                period_s: 1.0,
                source: SourceSpec::Simulated {
                    base: 1_800.0,
                    noise: 50.0,
                    fail_every: 0,
                },
                output: None,
            }),
        };

        let pump = AssetConfig {
            name: "PumpSpeed_1".into(),
            details: details(&[("Location", "Tank_1")]),
            services: vec![],
            consumed: vec![],
            kind: AssetKind::AnalogChannel(AnalogConfig {
                traits: AnalogTraits {
                    address: "OutputValue_1".into(),
                    value: 0.0,
                    min_value: 0.0,
                    max_value: 10_000.0,
                },
                period_s: 1.0,
                source: SourceSpec::Simulated {
                    base: 0.0,
                    noise: 0.0,
                    fail_every: 0,
                },
                output: Some(ActuatorSpec::Simulated),
            }),
        };

        let controller = AssetConfig {
            name: "Leveler_1".into(),
            details: details(&[("Location", "Tank_1")]),
            services: vec![],
            consumed: vec![
                ConsumedService {
                    definition: leveler::UPSTREAM.into(),
                    url: "local://LevelSensor_1/access".into(),
                    details: Details::new(),
                },
                ConsumedService {
                    definition: leveler::DOWNSTREAM.into(),
                    url: "local://PumpSpeed_1/access".into(),
                    details: Details::new(),
                },
            ],
            kind: AssetKind::Leveler(LevelerTraits::default()),
        };

        let thermometer = AssetConfig {
            name: "Thermometer_1".into(),
            details: details(&[("Location", "Kitchen")]),
            services: vec![],
            consumed: vec![],
            kind: AssetKind::Thermometer(ThermometerConfig {
                period_s: 2.0,
                source: SourceSpec::Simulated {
                    base: 21.0,
                    noise: 0.5,
                    fail_every: 0,
                },
            }),
        };

        let servo = AssetConfig {
            name: "Servo_1".into(),
            details: details(&[("Location", "Kitchen")]),
            services: vec![],
            consumed: vec![],
            kind: AssetKind::Servo(ServoConfig {
                output: ActuatorSpec::Simulated,
            }),
        };

        let topic = AssetConfig {
            name: String::new(),
            details: Details::new(),
            services: vec![],
            consumed: vec![],
            kind: AssetKind::Topic(TopicConfig {
                topic: "kitchen/temperature".into(),
                pattern: vec!["Location".into(), "Measurement".into()],
                unit: CELSIUS.into(),
                generator: Some(GeneratorConfig {
                    period_s: 1.0,
                    source: SourceSpec::Sine {
                        amplitude: 20.0,
                        offset: 20.0,
                        period_s: 30.0,
                    },
                }),
            }),
        };

        Self {
            name: "levelsystem".into(),
            description: "keeps the tank level at its setpoint".into(),
            address: default_address(),
            port: 20_151,
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            mailbox_capacity: default_mailbox_capacity(),
            assets: vec![simulated_level, pump, controller, thermometer, servo, topic],
        }
    }
}

fn details(pairs: &[(&str, &str)]) -> Details {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("asset-services-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir.join(DEFAULT_CONFIG_PATH)
    }

    #[test]
    fn template_is_valid() {
        SystemConfig::template().validate().unwrap();
    }

    #[test]
    fn missing_file_writes_loadable_template() {
        let path = temp_path("template");

        let err = SystemConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TemplateWritten(_)));

        let config = SystemConfig::load(&path).unwrap();
        assert_eq!(config, SystemConfig::template());
    }

    #[test]
    fn minimal_json_gets_defaults() {
        let config: SystemConfig = serde_json::from_str(
            r#"{
                "name": "tank",
                "port": 8870,
                "assets": [
                    {"name": "Leveler_1", "kind": "leveler", "setPt": 35,
                     "consumed": [
                        {"definition": "level", "url": "http://10.0.0.2:8870/tank/LevelSensor_1/access"},
                        {"definition": "pumpSpeed", "url": "http://10.0.0.3:8870/tank/Pump_1/access"}
                     ]},
                    {"name": "Probe", "kind": "thermometer",
                     "source": {"binding": "one_wire", "device": "28-00000a1b2c3d"}}
                ]
            }"#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        match &config.assets[0].kind {
            AssetKind::Leveler(traits) => {
                assert_eq!(traits.set_pt, 35.0);
                assert_eq!(traits.kp, 5.0);
                assert_eq!(traits.period, 5.0);
            }
            other => panic!("unexpected kind {other:?}"),
        }
        let profile = config.assets[1].profile().unwrap();
        assert_eq!(profile.services[0].sub_path, "temperature");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut config = SystemConfig::template();
        let copy = config.assets[0].clone();
        config.assets.push(copy);
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateAsset(_))));
    }

    #[test]
    fn leveler_checks() {
        let mut config = SystemConfig::template();
        let AssetKind::Leveler(traits) = &mut config.assets[2].kind else {
            panic!("template order changed");
        };
        traits.lambda = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = SystemConfig::template();
        config.assets[2].consumed.pop();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn flat_topic_fails_validation() {
        let mut config = SystemConfig::template();
        let AssetKind::Topic(topic) = &mut config.assets[5].kind else {
            panic!("template order changed");
        };
        topic.topic = "temperature".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn topic_asset_name_and_details_come_from_topic() {
        let config = SystemConfig::template();
        let profile = config.assets[5].profile().unwrap();
        assert_eq!(profile.name, "kitchen_temperature");
        assert_eq!(profile.details["Location"], ["kitchen"]);
        assert_eq!(profile.services[0].definition, "temperature");
    }

    #[test]
    fn out_of_range_periods_are_rejected() {
        for bad in [1e-12, 0.0, -1.0, 1e30, f64::NAN, f64::INFINITY] {
            let mut config = SystemConfig::template();
            let AssetKind::Leveler(traits) = &mut config.assets[2].kind else {
                panic!("template order changed");
            };
            traits.period = bad;
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid { .. })),
                "leveler period {bad} accepted"
            );

            let mut config = SystemConfig::template();
            let AssetKind::Thermometer(thermometer) = &mut config.assets[3].kind else {
                panic!("template order changed");
            };
            thermometer.period_s = bad;
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid { .. })),
                "sampler periodS {bad} accepted"
            );
        }
    }

    #[test]
    fn period_conversion_never_panics() {
        assert_eq!(period_from_secs(2.5), Duration::from_millis(2500));
        assert_eq!(period_from_secs(1e-12), MIN_PERIOD);
        assert_eq!(period_from_secs(1e30), MAX_PERIOD);
        assert_eq!(period_from_secs(f64::NAN), MAX_PERIOD);
        assert_eq!(checked_period(0.001), Some(MIN_PERIOD));
    }

    #[test]
    fn services_must_use_handled_paths() {
        let mut config = SystemConfig::template();
        config.assets[3].services = vec![ServiceDef::new("temperature", "temp", CELSIUS, "")];
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref reason, .. } if reason.contains("`temp`")));

        // Renaming the definition is fine as long as the path is served.
        let mut config = SystemConfig::template();
        config.assets[3].services = vec![ServiceDef::new("roomTemp", "temperature", CELSIUS, "")];
        config.validate().unwrap();
    }
}
