//! Built-in sample module.
//!
//! Serves three metrics under the `probe` namespace:
//! - `probe.counter`: singular u32 counter, bumped on every fetch
//! - `probe.greeting`: singular storable string
//! - `probe.shade`: per-instance f64 over the red/green/blue instance domain
//!
//! Small enough to read in one sitting, but it exercises every operation a
//! controller can dispatch: instances, the instance profile, store, help
//! text, the namespace, labels and attributes.

use pmlink_core::constants::{INTERFACE_LATEST, PROTOCOL_VERSION};
use pmlink_core::error::AgentError;
use pmlink_core::module::{AgentModule, InitContext};
use pmlink_core::protocol::{
    Attribute, ChildEntry, Descriptor, Instance, InstanceDomainId, InstanceFilter, Label,
    LabelTarget, MetricId, ProfileSpec, Semantics, TextKind, TextTarget, Units, Value, ValueAtom,
    ValueSet, ValueType,
};
use tracing::debug;

const CLUSTER: u32 = 0;
const ITEM_COUNTER: u32 = 0;
const ITEM_GREETING: u32 = 1;
const ITEM_SHADE: u32 = 2;
const SHADE_SERIAL: u32 = 1;

const SHADE_INSTANCES: [(i32, &str); 3] = [(0, "red"), (1, "green"), (2, "blue")];

enum Metric {
    Counter,
    Greeting,
    Shade,
}

/// The sample agent module.
pub struct SampleModule {
    domain: u32,
    interface: u32,
    counter: u32,
    greeting: String,
    shades: [f64; 3],
    profile: ProfileSpec,
    attributes: Vec<Attribute>,
}

impl Default for SampleModule {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleModule {
    pub fn new() -> Self {
        Self {
            domain: 29,
            interface: INTERFACE_LATEST,
            counter: 0,
            greeting: "hello".into(),
            shades: [0.1, 0.5, 0.9],
            profile: ProfileSpec::default(),
            attributes: Vec::new(),
        }
    }

    /// Announce an older interface generation at init time.
    pub fn with_interface(interface: u32) -> Self {
        Self {
            interface,
            ..Self::new()
        }
    }

    /// Attributes pushed by the controller so far.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    fn shade_indom(&self) -> InstanceDomainId {
        InstanceDomainId::new(self.domain, SHADE_SERIAL)
    }

    fn metric(&self, id: MetricId) -> Option<Metric> {
        if id.domain != self.domain || id.cluster != CLUSTER {
            return None;
        }
        match id.item {
            ITEM_COUNTER => Some(Metric::Counter),
            ITEM_GREETING => Some(Metric::Greeting),
            ITEM_SHADE => Some(Metric::Shade),
            _ => None,
        }
    }

    fn metric_id(&self, item: u32) -> MetricId {
        MetricId::new(self.domain, CLUSTER, item)
    }

    fn leaf_name(&self, id: MetricId) -> Option<&'static str> {
        self.metric(id).map(|m| match m {
            Metric::Counter => "probe.counter",
            Metric::Greeting => "probe.greeting",
            Metric::Shade => "probe.shade",
        })
    }

    fn fetch_one(&mut self, id: MetricId) -> std::result::Result<Vec<Value>, AgentError> {
        match self.metric(id).ok_or(AgentError::NO_SUCH_METRIC)? {
            Metric::Counter => {
                self.counter = self.counter.wrapping_add(1);
                Ok(vec![Value {
                    instance: None,
                    atom: ValueAtom::U32(self.counter),
                }])
            }
            Metric::Greeting => Ok(vec![Value {
                instance: None,
                atom: ValueAtom::String(self.greeting.clone()),
            }]),
            Metric::Shade => {
                let indom = self.shade_indom();
                Ok(SHADE_INSTANCES
                    .iter()
                    .filter(|(instance, _)| self.profile.includes(indom, *instance))
                    .map(|&(instance, _)| Value {
                        instance: Some(instance),
                        atom: ValueAtom::F64(self.shades[instance as usize]),
                    })
                    .collect())
            }
        }
    }
}

impl AgentModule for SampleModule {
    fn init(&mut self, ctx: &mut InitContext) {
        self.domain = ctx.domain;
        ctx.interface_version = self.interface;
        ctx.protocol_version = PROTOCOL_VERSION;
        ctx.status = 0;
    }

    fn profile(&mut self, spec: &ProfileSpec) -> std::result::Result<(), AgentError> {
        self.profile = spec.clone();
        Ok(())
    }

    fn descriptor(&mut self, metric: MetricId) -> std::result::Result<Descriptor, AgentError> {
        let desc = match self.metric(metric).ok_or(AgentError::NO_SUCH_METRIC)? {
            Metric::Counter => Descriptor {
                metric,
                value_type: ValueType::U32,
                indom: None,
                semantics: Semantics::Counter,
                units: Units {
                    dim_count: 1,
                    ..Units::default()
                },
            },
            Metric::Greeting => Descriptor {
                metric,
                value_type: ValueType::String,
                indom: None,
                semantics: Semantics::Instant,
                units: Units::default(),
            },
            Metric::Shade => Descriptor {
                metric,
                value_type: ValueType::F64,
                indom: Some(self.shade_indom()),
                semantics: Semantics::Instant,
                units: Units::default(),
            },
        };
        Ok(desc)
    }

    fn instances(
        &mut self,
        indom: InstanceDomainId,
        filter: &InstanceFilter,
    ) -> std::result::Result<Vec<Instance>, AgentError> {
        if indom != self.shade_indom() {
            return Err(AgentError::NO_SUCH_INDOM);
        }
        let all = SHADE_INSTANCES.iter().map(|&(id, name)| Instance {
            id,
            name: name.to_string(),
        });
        match filter {
            InstanceFilter::All => Ok(all.collect()),
            InstanceFilter::Id(id) => {
                let found: Vec<Instance> = all.filter(|inst| inst.id == *id).collect();
                if found.is_empty() {
                    Err(AgentError::NO_SUCH_INSTANCE)
                } else {
                    Ok(found)
                }
            }
            InstanceFilter::Name(name) => {
                let found: Vec<Instance> = all.filter(|inst| &inst.name == name).collect();
                if found.is_empty() {
                    Err(AgentError::NO_SUCH_INSTANCE)
                } else {
                    Ok(found)
                }
            }
        }
    }

    fn fetch(&mut self, metrics: &[MetricId]) -> std::result::Result<Vec<ValueSet>, AgentError> {
        Ok(metrics
            .iter()
            .map(|&metric| ValueSet {
                metric,
                result: self.fetch_one(metric),
            })
            .collect())
    }

    fn store(
        &mut self,
        metric: MetricId,
        values: &[Value],
    ) -> std::result::Result<(), AgentError> {
        match self.metric(metric).ok_or(AgentError::NO_SUCH_METRIC)? {
            Metric::Greeting => {
                let value = values.first().ok_or(AgentError::BAD_VALUE)?;
                match &value.atom {
                    ValueAtom::String(s) => {
                        debug!(greeting = %s, "greeting updated");
                        self.greeting = s.clone();
                        Ok(())
                    }
                    _ => Err(AgentError::TYPE_MISMATCH),
                }
            }
            // The counter and the shades are read-only.
            Metric::Counter | Metric::Shade => Err(AgentError::PERMISSION),
        }
    }

    fn text(
        &mut self,
        target: TextTarget,
        kind: TextKind,
    ) -> std::result::Result<String, AgentError> {
        let (oneline, help) = match target {
            TextTarget::Metric(id) => match self.metric(id).ok_or(AgentError::NO_SUCH_METRIC)? {
                Metric::Counter => (
                    "fetches served since the session began",
                    "A cumulative count of fetch operations. Bumped once per \
                     fetch that includes it, never reset.",
                ),
                Metric::Greeting => (
                    "a storable greeting string",
                    "A free-form string. Storing a new value replaces it for \
                     subsequent fetches.",
                ),
                Metric::Shade => (
                    "one value per color instance",
                    "A per-instance value over the red/green/blue instance \
                     domain, subject to the active instance profile.",
                ),
            },
            TextTarget::InstanceDomain(indom) => {
                if indom != self.shade_indom() {
                    return Err(AgentError::NO_SUCH_INDOM);
                }
                (
                    "the three color instances",
                    "Instance domain holding the red, green and blue instances \
                     backing probe.shade.",
                )
            }
        };
        Ok(match kind {
            TextKind::OneLine => oneline.to_string(),
            TextKind::Help => help.to_string(),
        })
    }

    fn lookup_ids(
        &mut self,
        names: &[String],
    ) -> std::result::Result<Vec<std::result::Result<MetricId, AgentError>>, AgentError> {
        Ok(names
            .iter()
            .map(|name| match name.as_str() {
                "probe.counter" => Ok(self.metric_id(ITEM_COUNTER)),
                "probe.greeting" => Ok(self.metric_id(ITEM_GREETING)),
                "probe.shade" => Ok(self.metric_id(ITEM_SHADE)),
                _ => Err(AgentError::NO_SUCH_METRIC),
            })
            .collect())
    }

    fn lookup_names(&mut self, metric: MetricId) -> std::result::Result<Vec<String>, AgentError> {
        self.leaf_name(metric)
            .map(|name| vec![name.to_string()])
            .ok_or(AgentError::NO_SUCH_METRIC)
    }

    fn children(&mut self, name: &str) -> std::result::Result<Vec<ChildEntry>, AgentError> {
        match name {
            "" => Ok(vec![ChildEntry {
                name: "probe".into(),
                leaf: false,
            }]),
            "probe" => Ok(["counter", "greeting", "shade"]
                .iter()
                .map(|&leaf| ChildEntry {
                    name: leaf.into(),
                    leaf: true,
                })
                .collect()),
            "probe.counter" | "probe.greeting" | "probe.shade" => Ok(Vec::new()),
            _ => Err(AgentError::NO_SUCH_METRIC),
        }
    }

    fn traverse(&mut self, name: &str) -> std::result::Result<Vec<String>, AgentError> {
        let all = || {
            vec![
                "probe.counter".to_string(),
                "probe.greeting".to_string(),
                "probe.shade".to_string(),
            ]
        };
        match name {
            "" | "probe" => Ok(all()),
            "probe.counter" | "probe.greeting" | "probe.shade" => Ok(vec![name.to_string()]),
            _ => Err(AgentError::NO_SUCH_METRIC),
        }
    }

    fn attribute(&mut self, attribute: &Attribute) -> std::result::Result<(), AgentError> {
        self.attributes.push(attribute.clone());
        Ok(())
    }

    fn labels(&mut self, target: &LabelTarget) -> std::result::Result<Vec<Label>, AgentError> {
        let labels = match target {
            LabelTarget::Context => vec![Label {
                name: "agent".into(),
                value: "\"sample\"".into(),
            }],
            LabelTarget::Metric(id) => match self.metric(*id) {
                Some(Metric::Counter) => vec![Label {
                    name: "units".into(),
                    value: "\"count\"".into(),
                }],
                Some(_) => Vec::new(),
                None => return Err(AgentError::NO_SUCH_METRIC),
            },
            LabelTarget::InstanceDomain(indom) | LabelTarget::Instances(indom) => {
                if *indom != self.shade_indom() {
                    return Err(AgentError::NO_SUCH_INDOM);
                }
                vec![Label {
                    name: "model".into(),
                    value: "\"rgb\"".into(),
                }]
            }
            LabelTarget::Domain(_) | LabelTarget::Cluster(_) => Vec::new(),
        };
        Ok(labels)
    }
}

// =============================================================================
// Tests
// =============================================================================
