use serde::{Deserialize, Serialize};

/// Claude model tier selectable per chat with `/model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Haiku,
    Sonnet,
    Opus,
}

impl ModelTier {
    /// API model identifier for this tier.
    pub fn api_id(&self) -> &'static str {
        match self {
            ModelTier::Haiku => "claude-haiku-4-5-20251001",
            ModelTier::Sonnet => "claude-sonnet-4-6",
            ModelTier::Opus => "claude-opus-4-1-20250805",
        }
    }

    pub fn max_output_tokens(&self) -> u32 {
        match self {
            ModelTier::Haiku => 4096,
            ModelTier::Sonnet => 8192,
            ModelTier::Opus => 8192,
        }
    }

    /// Extended-thinking budget. Zero disables the thinking block.
    pub fn thinking_budget(&self) -> u32 {
        match self {
            ModelTier::Haiku => 0,
            ModelTier::Sonnet => 4096,
            ModelTier::Opus => 8192,
        }
    }
}

impl Default for ModelTier {
    fn default() -> Self {
        ModelTier::Sonnet
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelTier::Haiku => "haiku",
            ModelTier::Sonnet => "sonnet",
            ModelTier::Opus => "opus",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "haiku" => Ok(ModelTier::Haiku),
            "sonnet" => Ok(ModelTier::Sonnet),
            "opus" => Ok(ModelTier::Opus),
            other => Err(format!("unknown model tier: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_round_trips_through_str() {
        for tier in [ModelTier::Haiku, ModelTier::Sonnet, ModelTier::Opus] {
            let parsed: ModelTier = tier.to_string().parse().unwrap();
            assert_eq!(parsed, tier);
        }
    }

    #[test]
    fn unknown_tier_is_rejected() {
        assert!("gpt".parse::<ModelTier>().is_err());
    }
}
