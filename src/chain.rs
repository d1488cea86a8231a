use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::adapter::{adapt, ParameterBag};
use crate::codec::ImageTensor;
use crate::invoke::invoke_and_normalize;
use crate::registry::NodeResolver;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainStage {
    #[serde(rename = "type", default, deserialize_with = "string_or_empty")]
    pub node_type: String,
    #[serde(default, deserialize_with = "params_or_empty")]
    pub params: ParameterBag,
}

impl ChainStage {
    pub fn new(node_type: impl Into<String>, params: ParameterBag) -> Self {
        Self {
            node_type: node_type.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainSpec(Vec<ChainStage>);

impl ChainSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, node_type: impl Into<String>, params: ParameterBag) -> Self {
        self.0.push(ChainStage::new(node_type, params));
        self
    }

    pub fn stages(&self) -> &[ChainStage] {
        self.0.as_slice()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<ChainStage>> for ChainSpec {
    fn from(stages: Vec<ChainStage>) -> Self {
        Self(stages)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Applied { width: usize, height: usize },
    Unresolved { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub index: usize,
    pub node_type: String,
    #[serde(flatten)]
    pub outcome: StageOutcome,
}

impl StageReport {
    pub fn applied(&self) -> bool {
        matches!(self.outcome, StageOutcome::Applied { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ChainRun {
    pub image: ImageTensor,
    pub stages: Vec<StageReport>,
}

pub fn run_chain(resolver: &NodeResolver, initial: ImageTensor, chain: &ChainSpec) -> ImageTensor {
    run_chain_with_report(resolver, initial, chain).image
}

pub fn run_chain_with_report(
    resolver: &NodeResolver,
    initial: ImageTensor,
    chain: &ChainSpec,
) -> ChainRun {
    let mut current = initial;
    let mut stages = Vec::with_capacity(chain.len());

    for (index, stage) in chain.stages().iter().enumerate() {
        let node_type = stage.node_type.as_str();
        let outcome = match resolver.resolve(node_type) {
            Err(not_found) => {
                warn!(stage = index, node_type, reason = %not_found, "skipping unresolved chain stage");
                StageOutcome::Unresolved {
                    reason: not_found.to_string(),
                }
            }
            Ok(descriptor) => {
                let args = adapt(&descriptor, &current, &stage.params);
                match invoke_and_normalize(&descriptor, args) {
                    Ok(next) => {
                        info!(
                            stage = index,
                            node_type,
                            width = next.width(),
                            height = next.height(),
                            "chain stage applied"
                        );
                        let outcome = StageOutcome::Applied {
                            width: next.width(),
                            height: next.height(),
                        };
                        current = next;
                        outcome
                    }
                    Err(failure) => {
                        warn!(stage = index, node_type, error = %failure, "skipping failed chain stage");
                        StageOutcome::Failed {
                            reason: failure.to_string(),
                        }
                    }
                }
            }
        };
        stages.push(StageReport {
            index,
            node_type: node_type.to_string(),
            outcome,
        });
    }

    ChainRun {
        image: current,
        stages,
    }
}

fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn params_or_empty<'de, D>(deserializer: D) -> Result<ParameterBag, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<ParameterBag>::deserialize(deserializer)?.unwrap_or_default())
}
