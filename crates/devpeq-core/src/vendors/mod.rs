//! Vendor adapter registry
//!
//! One module per device family, each owning its own opcodes, report ids
//! and scaling. `Vendor` is the tag callers hold; it resolves to a boxed
//! `PeqAdapter` at the boundary.

pub mod moondrop;
pub mod qudelix;
pub mod tanchjim;

pub use moondrop::MoondropAdapter;
pub use qudelix::QudelixAdapter;
pub use tanchjim::TanchjimAdapter;

use crate::adapter::PeqAdapter;
use crate::types::ModelConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Device family tag selecting the adapter implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Moondrop,
    Qudelix,
    Tanchjim,
}

/// Known vendor entry
struct KnownVendor {
    vendor: Vendor,
    label: &'static str,
    default_bands: usize,
    create: fn() -> Box<dyn PeqAdapter>,
}

static KNOWN_VENDORS: &[KnownVendor] = &[
    KnownVendor {
        vendor: Vendor::Moondrop,
        label: "moondrop",
        default_bands: moondrop::BAND_COUNT as usize,
        create: || Box::new(MoondropAdapter),
    },
    KnownVendor {
        vendor: Vendor::Qudelix,
        label: "qudelix",
        default_bands: 10,
        create: || Box::new(QudelixAdapter),
    },
    KnownVendor {
        vendor: Vendor::Tanchjim,
        label: "tanchjim",
        default_bands: 10,
        create: || Box::new(TanchjimAdapter),
    },
];

impl Vendor {
    pub const ALL: [Vendor; 3] = [Vendor::Moondrop, Vendor::Qudelix, Vendor::Tanchjim];

    fn entry(self) -> &'static KnownVendor {
        // Every variant has a table row
        match KNOWN_VENDORS.iter().find(|k| k.vendor == self) {
            Some(entry) => entry,
            None => unreachable!("vendor {:?} missing from KNOWN_VENDORS", self),
        }
    }

    /// Lowercase name, as used in config files and on the command line
    pub fn label(self) -> &'static str {
        self.entry().label
    }

    /// Fresh adapter for this family
    pub fn adapter(self) -> Box<dyn PeqAdapter> {
        (self.entry().create)()
    }

    /// Capabilities assumed for a device of this family with no profile
    pub fn default_model(self) -> ModelConfig {
        ModelConfig {
            name: self.label().to_string(),
            max_filters: self.entry().default_bands,
            ..ModelConfig::default()
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        KNOWN_VENDORS
            .iter()
            .find(|k| k.label == wanted)
            .map(|k| k.vendor)
            .ok_or_else(|| format!("unknown vendor '{}'", s))
    }
}
