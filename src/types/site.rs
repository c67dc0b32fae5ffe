//! Site identity: which school line a measurement belongs to
//!
//! The remote form only accepts a closed set of values for sector, provider
//! and service type. Raw configuration strings are checked against those sets
//! once, at startup, and the rest of the crate only ever sees the typed
//! [`SiteIdentity`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Validation Error
// ============================================================================

/// A site identity value that the remote form would not accept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid {field} '{value}' (allowed: {})", .allowed.join(", "))]
    NotInEnumeration {
        field: &'static str,
        value: String,
        allowed: Vec<&'static str>,
    },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

// ============================================================================
// Enumerations
// ============================================================================

/// Declares a closed enumeration whose variants carry the exact label the
/// remote form expects plus an ASCII alias usable in config files.
macro_rules! form_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $($variant:ident => ($label:literal, $alias:literal)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every accepted value, in form order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The exact option text submitted to the form.
            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            /// ASCII identifier accepted in configuration.
            pub fn alias(self) -> &'static str {
                match self {
                    $($name::$variant => $alias),+
                }
            }

            pub fn allowed_labels() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.label()).collect()
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let value = raw.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.label() == value || v.alias().eq_ignore_ascii_case(value))
                    .ok_or_else(|| ValidationError::NotInEnumeration {
                        field: $field,
                        value: raw.to_string(),
                        allowed: Self::allowed_labels(),
                    })
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                raw.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.label().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

form_enum! {
    /// School sector (قطاع المدرسة).
    Sector, "sector" {
        Muscat => ("مسقط", "muscat"),
        Qurayyat => ("قريات", "qurayyat"),
        Seeb => ("السيب", "seeb"),
        Amerat => ("العامرات", "amerat"),
        Bawshar => ("بوشر", "bawshar"),
        Muttrah => ("مطرح", "muttrah"),
    }
}

form_enum! {
    /// Internet service provider (موفر الخدمة).
    Provider, "provider" {
        Omantel => ("عمانتل", "omantel"),
        Ooredoo => ("أوريدو", "ooredoo"),
        Awasr => ("أواصر", "awasr"),
    }
}

form_enum! {
    /// Line technology (نوع الخدمة). Note the space between "5" and "G".
    ServiceType, "service type" {
        Fiber => ("فايبر", "fiber"),
        FiveG => ("الجيل الخامس 5 G", "5g"),
    }
}

// ============================================================================
// Raw + Validated Identity
// ============================================================================

/// Site identity exactly as written in the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default)]
    pub school_code: String,
    #[serde(default)]
    pub sector: String,
    #[serde(default)]
    pub school_name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub line_number: String,
    #[serde(default)]
    pub service_type: String,
    /// Falls back to the host name when unset.
    #[serde(default)]
    pub device_name: Option<String>,
}

/// Validated, read-only identity of the measured line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteIdentity {
    pub school_code: String,
    pub sector: Sector,
    pub school_name: String,
    pub provider: Provider,
    pub line_number: String,
    pub service_type: ServiceType,
    pub device_name: String,
}

impl TryFrom<&SiteConfig> for SiteIdentity {
    type Error = ValidationError;

    fn try_from(raw: &SiteConfig) -> Result<Self, Self::Error> {
        let sector: Sector = raw.sector.parse()?;
        let provider: Provider = raw.provider.parse()?;
        let service_type: ServiceType = raw.service_type.parse()?;

        Ok(Self {
            school_code: required(&raw.school_code, "school_code")?,
            sector,
            school_name: required(&raw.school_name, "school_name")?,
            provider,
            line_number: required(&raw.line_number, "line_number")?,
            service_type,
            device_name: raw
                .device_name
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(default_device_name),
        })
    }
}

fn required(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ValidationError::Empty(field))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Host name from the environment (`COMPUTERNAME` on Windows, `HOSTNAME`
/// elsewhere), or `"Device"`.
pub fn default_device_name() -> String {
    ["COMPUTERNAME", "HOSTNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| "Device".to_string())
}
