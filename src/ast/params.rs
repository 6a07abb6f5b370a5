//! Global deployment parameters
//!
//! Supplied once per run and handed to every module apply.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DeployError;

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentType {
    #[default]
    Dev,
    Staging,
    Prod,
    Sweden,
}

impl EnvironmentType {
    pub const ALL: [EnvironmentType; 4] = [Self::Dev, Self::Staging, Self::Prod, Self::Sweden];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Prod => "prod",
            Self::Sweden => "sweden",
        }
    }
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvironmentType {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|env| env.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DeployError::InvalidParam {
                name: "environment".to_string(),
                value: s.to_string(),
                expected: join_names(Self::ALL.iter().map(Self::as_str)),
            })
    }
}

/// Azure region a deployment targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "canadaeast")]
    CanadaEast,
    #[default]
    #[serde(rename = "eastus")]
    EastUs,
    #[serde(rename = "westeurope")]
    WestEurope,
    #[serde(rename = "swedencentral")]
    SwedenCentral,
}

impl Region {
    pub const ALL: [Region; 4] = [
        Self::CanadaEast,
        Self::EastUs,
        Self::WestEurope,
        Self::SwedenCentral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CanadaEast => "canadaeast",
            Self::EastUs => "eastus",
            Self::WestEurope => "westeurope",
            Self::SwedenCentral => "swedencentral",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|region| region.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DeployError::InvalidParam {
                name: "region".to_string(),
                value: s.to_string(),
                expected: join_names(Self::ALL.iter().map(Self::as_str)),
            })
    }
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}

/// Parameters available to every module of a plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalParams {
    #[serde(default)]
    pub environment: EnvironmentType,
    #[serde(default)]
    pub region: Region,
}

impl GlobalParams {
    pub fn new(environment: EnvironmentType, region: Region) -> Self {
        Self {
            environment,
            region,
        }
    }
}
