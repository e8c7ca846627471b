// src/bridge.rs - Contracts for protocol bridges and acquisition sources
use crate::{
    error::Result,
    tag::Tag,
    tag_store::TagStore,
    value::Value,
};
use chrono::{DateTime, Utc};
use tracing::trace;

/// Something an acquisition machine can poll for a tag's current reading.
pub trait DataSource: Send {
    fn name(&self) -> &str;

    /// Reading for `tag`, expressed in the tag's native unit
    fn read(&mut self, tag: &Tag) -> Result<Value>;
}

/// What a protocol client (OPC UA or similar) must provide to feed tags.
///
/// Values flow back through a [`BridgeIngress`].
pub trait ProtocolBridge: Send + Sync {
    /// Server node id for a namespace string, if the server knows it
    fn get_node_id_by_namespace(&self, namespace: &str) -> Option<String>;

    fn subscribe(&self, tag: &Tag) -> Result<()>;

    fn unsubscribe(&self, tag: &Tag) -> Result<()>;
}

/// Entry point a bridge uses to deliver values into the store.
#[derive(Debug, Clone)]
pub struct BridgeIngress {
    store: TagStore,
    address: Option<String>,
}

impl BridgeIngress {
    /// Ingress scoped to the tags bound to `address`, or to any address
    pub fn new(store: TagStore, address: Option<String>) -> Self {
        Self { store, address }
    }

    pub fn deliver(
        &self,
        namespace: &str,
        value: impl Into<Value>,
        source_timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let value = value.into();
        trace!("Bridge delivered {} = {}", namespace, value);
        self.store
            .write_by_node_namespace(self.address.as_deref(), namespace, value, source_timestamp)
    }
}

#[cfg(feature = "simulation")]
pub use simulated::SimulatedSource;

#[cfg(feature = "simulation")]
mod simulated {
    use super::DataSource;
    use crate::{config::SourceConfig, error::Result, tag::Tag, value::{DataType, Value}};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::TAU;
    use std::time::Instant;

    /// Sine wave plus uniform noise. Each tag gets its own phase so tags fed
    /// by the same source do not move in lockstep.
    pub struct SimulatedSource {
        rng: StdRng,
        amplitude: f64,
        offset: f64,
        period_s: f64,
        noise: f64,
        started: Instant,
    }

    impl SimulatedSource {
        pub fn new(
            amplitude: f64,
            offset: f64,
            period_s: f64,
            noise: f64,
            seed: Option<u64>,
        ) -> Self {
            let rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            Self {
                rng,
                amplitude,
                offset,
                period_s: period_s.max(f64::EPSILON),
                noise: noise.abs(),
                started: Instant::now(),
            }
        }

        pub fn from_config(config: &SourceConfig) -> Self {
            Self::new(
                config.amplitude,
                config.offset,
                config.period_s,
                config.noise,
                config.seed,
            )
        }

        fn phase(tag: &Tag) -> f64 {
            let sum: u32 = tag.name.bytes().map(u32::from).sum();
            f64::from(sum % 360).to_radians()
        }
    }

    impl DataSource for SimulatedSource {
        fn name(&self) -> &str {
            "simulated"
        }

        fn read(&mut self, tag: &Tag) -> Result<Value> {
            let t = self.started.elapsed().as_secs_f64();
            let phase = TAU * t / self.period_s + Self::phase(tag);
            let mut v = self.offset + self.amplitude * phase.sin();
            if self.noise > 0.0 {
                v += self.rng.gen_range(-self.noise..=self.noise);
            }
            let value = match tag.data_type {
                DataType::Boolean => Value::Bool(v > self.offset),
                DataType::Integer => Value::Int(v.round() as i64),
                DataType::Float => Value::Float(v),
            };
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tag::TagSpec, units::Variable, value::DataType};

    #[test]
    fn test_ingress_writes_bound_tag() {
        let store = TagStore::new();
        store
            .set_tag(
                TagSpec::new("T1", Variable::Temperature, "degC", DataType::Float)
                    .with_node("opc.tcp://plc:4840", "ns=2;s=Boiler.Temp"),
            )
            .unwrap();
        let ingress = BridgeIngress::new(store.clone(), Some("opc.tcp://plc:4840".into()));
        let ts = Utc::now();
        ingress.deliver("ns=2;s=Boiler.Temp", 81.5, Some(ts)).unwrap();

        let tag = store.get_tag_by_name("T1").unwrap();
        assert_eq!(tag.value, Value::Float(81.5));
        assert_eq!(tag.timestamp, Some(ts));
        assert!(ingress.deliver("ns=2;s=Unknown", 1.0, None).is_err());
    }

    #[cfg(feature = "simulation")]
    #[test]
    fn test_simulated_source_stays_in_band() {
        let store = TagStore::new();
        let tag = store
            .set_tag(TagSpec::new("T1", Variable::Pressure, "kPa", DataType::Float))
            .unwrap();
        let mut source = SimulatedSource::new(10.0, 100.0, 5.0, 1.0, Some(7));
        for _ in 0..50 {
            let v = source.read(&tag).unwrap().as_float().unwrap();
            assert!((89.0..=111.0).contains(&v), "{}", v);
        }
    }
}
