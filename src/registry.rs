use once_cell::sync::Lazy;

use crate::types::{ParamMap, ParamValue};

/// Processing stage a block belongs to. Categories flow roughly left to
/// right in a strategy: data feeds features, features feed signals, signals
/// feed sizing/risk, and execution sits at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockCategory {
    Data,
    Feature,
    Signal,
    Sizing,
    Risk,
    Execution,
}

impl BlockCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockCategory::Data => "data",
            BlockCategory::Feature => "feature",
            BlockCategory::Signal => "signal",
            BlockCategory::Sizing => "sizing",
            BlockCategory::Risk => "risk",
            BlockCategory::Execution => "execution",
        }
    }

    /// Render color used by the canvas layer, one hue per category.
    pub fn color(self) -> &'static str {
        match self {
            BlockCategory::Data => "#4a90d9",
            BlockCategory::Feature => "#7b61c4",
            BlockCategory::Signal => "#d98f3a",
            BlockCategory::Sizing => "#3aa06b",
            BlockCategory::Risk => "#c74545",
            BlockCategory::Execution => "#8a8a8e",
        }
    }
}

/// Static description of a block type. Immutable, defined at process start.
#[derive(Debug, Clone)]
pub struct BlockType {
    /// `category.name`, e.g. `feature.rsi`.
    pub id: &'static str,
    pub category: BlockCategory,
    pub display_name: &'static str,
    defaults: &'static [(&'static str, DefaultParam)],
}

#[derive(Debug, Clone, Copy)]
enum DefaultParam {
    Number(f64),
    Text(&'static str),
    Flag(bool),
}

impl BlockType {
    pub fn default_params(&self) -> ParamMap {
        self.defaults
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    DefaultParam::Number(n) => ParamValue::Number(*n),
                    DefaultParam::Text(s) => ParamValue::Text(s.to_string()),
                    DefaultParam::Flag(b) => ParamValue::Flag(*b),
                };
                (key.to_string(), value)
            })
            .collect()
    }

    pub fn color(&self) -> &'static str {
        self.category.color()
    }
}

static CATALOG: Lazy<Vec<BlockType>> = Lazy::new(|| {
    use BlockCategory::*;
    use DefaultParam::*;

    vec![
        BlockType {
            id: "data.ohlcv",
            category: Data,
            display_name: "OHLCV Bars",
            defaults: &[("source", Text("exchange")), ("adjust", Flag(true))],
        },
        BlockType {
            id: "feature.rsi",
            category: Feature,
            display_name: "RSI",
            defaults: &[("period", Number(14.0)), ("source", Text("close"))],
        },
        BlockType {
            id: "feature.sma",
            category: Feature,
            display_name: "Simple MA",
            defaults: &[("period", Number(20.0)), ("source", Text("close"))],
        },
        BlockType {
            id: "feature.ema",
            category: Feature,
            display_name: "Exponential MA",
            defaults: &[("period", Number(12.0)), ("source", Text("close"))],
        },
        BlockType {
            id: "feature.macd",
            category: Feature,
            display_name: "MACD",
            defaults: &[
                ("fast", Number(12.0)),
                ("slow", Number(26.0)),
                ("signal", Number(9.0)),
            ],
        },
        BlockType {
            id: "signal.threshold",
            category: Signal,
            display_name: "Threshold",
            defaults: &[
                ("buy_below", Number(30.0)),
                ("sell_above", Number(70.0)),
            ],
        },
        BlockType {
            id: "signal.crossover",
            category: Signal,
            display_name: "Crossover",
            defaults: &[("direction", Text("both"))],
        },
        BlockType {
            id: "sizing.fixed_fraction",
            category: Sizing,
            display_name: "Fixed Fraction",
            defaults: &[("fraction", Number(0.1))],
        },
        BlockType {
            id: "risk.stop_loss",
            category: Risk,
            display_name: "Stop Loss",
            defaults: &[("percent", Number(5.0)), ("trailing", Flag(false))],
        },
        BlockType {
            id: "execution.market",
            category: Execution,
            display_name: "Market Order",
            defaults: &[("slippage_bps", Number(2.0))],
        },
    ]
});

/// Look up a block type by its `category.name` id. An unknown id is a caller
/// bug (the catalog is compiled in), so call sites inside the crate `expect`
/// on the result.
pub fn describe(block_type_id: &str) -> Option<&'static BlockType> {
    CATALOG.iter().find(|block| block.id == block_type_id)
}

/// Default parameter map for a block type.
pub fn default_params(block_type_id: &str) -> Option<ParamMap> {
    describe(block_type_id).map(BlockType::default_params)
}

/// All registered block types, in catalog order.
pub fn all() -> &'static [BlockType] {
    &CATALOG
}
