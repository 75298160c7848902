use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a wire string does not match any enum variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field} value: {value}")]
pub struct InvalidEnumValue {
    pub field: String,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnumValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(InvalidEnumValue {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(ConsultationStatus {
    Idle => "idle",
    Recording => "recording",
    Paused => "paused",
    Processing => "processing",
    Review => "review",
    SignedOff => "signed_off",
});

str_enum!(PipelineStage {
    Transcribing => "transcribing",
    RetrievingContext => "retrieving_context",
    GeneratingDocument => "generating_document",
    Complete => "complete",
    Failed => "failed",
});

str_enum!(LabTrend {
    Rising => "rising",
    Falling => "falling",
    Stable => "stable",
});
