//! Requirement profiles
//!
//! A requirement profile is the classification vector attached to one
//! incoming request. Every dimension is optional: an absent dimension simply
//! does not vote. A present dimension must carry a recognised value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// A routing dimension of the requirement profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    ComplexityLevel,
    DomainType,
    LanguageType,
    PrivacyLevel,
    ResponseTime,
    AnalysisDepth,
}

impl Dimension {
    /// Tie-break priority, highest first.
    pub const PRIORITY: [Dimension; 6] = [
        Dimension::ComplexityLevel,
        Dimension::DomainType,
        Dimension::LanguageType,
        Dimension::PrivacyLevel,
        Dimension::ResponseTime,
        Dimension::AnalysisDepth,
    ];

    /// Name used in the rules document and in profiles
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::ComplexityLevel => "complexity_level",
            Dimension::DomainType => "domain_type",
            Dimension::LanguageType => "language_type",
            Dimension::PrivacyLevel => "privacy_level",
            Dimension::ResponseTime => "response_time",
            Dimension::AnalysisDepth => "analysis_depth",
        }
    }

    /// Parse a dimension name from the rules document
    pub fn from_name(name: &str) -> Option<Self> {
        Self::PRIORITY.into_iter().find(|d| d.as_str() == name)
    }

    /// The closed value set of this dimension, or `None` for open dimensions.
    ///
    /// `domain_type` is open: its members are whatever the rule table maps.
    pub fn closed_values(&self) -> Option<&'static [&'static str]> {
        match self {
            Dimension::ComplexityLevel => Some(ComplexityLevel::NAMES),
            Dimension::DomainType => None,
            Dimension::LanguageType => Some(LanguageType::NAMES),
            Dimension::PrivacyLevel => Some(PrivacyLevel::NAMES),
            Dimension::ResponseTime => Some(ResponseTime::NAMES),
            Dimension::AnalysisDepth => Some(AnalysisDepth::NAMES),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declares a closed category enum with its wire names.
macro_rules! category_enum {
    ($(#[$meta:meta])* $name:ident, $dimension:expr, { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            /// Every wire name of this category, in declaration order
            pub const NAMES: &'static [&'static str] = &[$($wire),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> AppResult<Self> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(AppError::InvalidProfile(format!(
                        "'{}' is not a valid {}",
                        other, $dimension
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

category_enum!(
    /// How demanding the request is
    ComplexityLevel, Dimension::ComplexityLevel, {
        Simple => "simple",
        Medium => "medium",
        Complex => "complex",
    }
);

category_enum!(
    /// Language of the request content
    LanguageType, Dimension::LanguageType, {
        Chinese => "chinese",
        English => "english",
        Multilingual => "multilingual",
    }
);

category_enum!(
    /// Depth of analysis requested
    AnalysisDepth, Dimension::AnalysisDepth, {
        Basic => "basic",
        Detailed => "detailed",
        Comprehensive => "comprehensive",
    }
);

category_enum!(
    /// Sensitivity of the request content
    PrivacyLevel, Dimension::PrivacyLevel, {
        Sensitive => "sensitive",
        Normal => "normal",
        Public => "public",
    }
);

category_enum!(
    /// Latency expectation of the caller
    ResponseTime, Dimension::ResponseTime, {
        RealTime => "real_time",
        Fast => "fast",
        Normal => "normal",
        Batch => "batch",
    }
);

/// Classification vector of one request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequirementProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity_level: Option<ComplexityLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_type: Option<LanguageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_depth: Option<AnalysisDepth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_level: Option<PrivacyLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<ResponseTime>,
    /// Override tag such as `traditional_chinese_ocr`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_category: Option<String>,
}

impl RequirementProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a profile from untrusted JSON.
    ///
    /// Unknown fields and unknown values of closed dimensions are reported
    /// as `InvalidProfile`.
    pub fn from_value(value: serde_json::Value) -> AppResult<Self> {
        serde_json::from_value(value).map_err(|e| AppError::InvalidProfile(e.to_string()))
    }

    pub fn with_complexity(mut self, level: ComplexityLevel) -> Self {
        self.complexity_level = Some(level);
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain_type = Some(domain.into());
        self
    }

    pub fn with_language(mut self, language: LanguageType) -> Self {
        self.language_type = Some(language);
        self
    }

    pub fn with_analysis_depth(mut self, depth: AnalysisDepth) -> Self {
        self.analysis_depth = Some(depth);
        self
    }

    pub fn with_privacy(mut self, privacy: PrivacyLevel) -> Self {
        self.privacy_level = Some(privacy);
        self
    }

    pub fn with_response_time(mut self, response_time: ResponseTime) -> Self {
        self.response_time = Some(response_time);
        self
    }

    pub fn with_special_category(mut self, category: impl Into<String>) -> Self {
        self.special_category = Some(category.into());
        self
    }

    /// Category value of a dimension, if present
    pub fn value(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::ComplexityLevel => self.complexity_level.map(|v| v.as_str()),
            Dimension::DomainType => self.domain_type.as_deref(),
            Dimension::LanguageType => self.language_type.map(|v| v.as_str()),
            Dimension::PrivacyLevel => self.privacy_level.map(|v| v.as_str()),
            Dimension::ResponseTime => self.response_time.map(|v| v.as_str()),
            Dimension::AnalysisDepth => self.analysis_depth.map(|v| v.as_str()),
        }
    }

    /// Restrict the profile to the given dimensions
    pub fn only(&self, dimensions: &[Dimension]) -> Self {
        let keep = |d: Dimension| dimensions.contains(&d);
        Self {
            complexity_level: self.complexity_level.filter(|_| keep(Dimension::ComplexityLevel)),
            domain_type: self.domain_type.clone().filter(|_| keep(Dimension::DomainType)),
            language_type: self.language_type.filter(|_| keep(Dimension::LanguageType)),
            analysis_depth: self.analysis_depth.filter(|_| keep(Dimension::AnalysisDepth)),
            privacy_level: self.privacy_level.filter(|_| keep(Dimension::PrivacyLevel)),
            response_time: self.response_time.filter(|_| keep(Dimension::ResponseTime)),
            special_category: None,
        }
    }
}
