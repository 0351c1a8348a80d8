use crate::{
    error::EngineError,
    strategy::{
        Strategy,
        bollinger_breakout::{BollingerBreakout, BollingerBreakoutParams},
        dual_ma::{DualMovingAverage, DualMaParams},
        macd_divergence::{MacdDivergence, MacdDivergenceParams},
        rsi_reversion::{RsiMeanReversion, RsiReversionParams},
        triple_ma::{TripleMovingAverage, TripleMaParams},
    },
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use zigquant_instrument::{candle::Timeframe, pair::TradingPair};

/// Descriptor from which a strategy worker or backtest builds its strategy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyRequest {
    /// Registered strategy name, eg/ "dual_ma".
    pub strategy: SmolStr,
    pub pair: TradingPair,
    pub timeframe: Timeframe,
    /// Strategy-specific parameters; missing fields take their defaults.
    #[serde(default)]
    pub params: Value,
}

impl StrategyRequest {
    pub fn new(strategy: impl Into<SmolStr>, pair: TradingPair, timeframe: Timeframe) -> Self {
        Self {
            strategy: strategy.into(),
            pair,
            timeframe,
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

fn parse_params<'de, P: Deserialize<'de> + Default>(params: &'de Value) -> Result<P, EngineError> {
    if params.is_null() {
        return Ok(P::default());
    }
    P::deserialize(params).map_err(|error| {
        EngineError::Validation(format!("invalid strategy parameters: {error}"))
    })
}

/// Construct the strategy described by `request`.
///
/// The rest of the runtime only ever sees the returned `Box<dyn Strategy>`;
/// this is the single place aware of the concrete variants.
pub fn build(request: &StrategyRequest) -> Result<Box<dyn Strategy>, EngineError> {
    let timeframe = request.timeframe;
    let strategy: Box<dyn Strategy> = match request.strategy.as_str() {
        "dual_ma" => Box::new(DualMovingAverage::new(
            parse_params::<DualMaParams>(&request.params)?,
            timeframe,
        )?),
        "rsi_reversion" => Box::new(RsiMeanReversion::new(
            parse_params::<RsiReversionParams>(&request.params)?,
            timeframe,
        )?),
        "bollinger_breakout" => Box::new(BollingerBreakout::new(
            parse_params::<BollingerBreakoutParams>(&request.params)?,
            timeframe,
        )?),
        "triple_ma" => Box::new(TripleMovingAverage::new(
            parse_params::<TripleMaParams>(&request.params)?,
            timeframe,
        )?),
        "macd_divergence" => Box::new(MacdDivergence::new(
            parse_params::<MacdDivergenceParams>(&request.params)?,
            timeframe,
        )?),
        unknown => {
            return Err(EngineError::Validation(format!(
                "unknown strategy \"{unknown}\""
            )));
        }
    };
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(name: &str) -> StrategyRequest {
        StrategyRequest::new(name, TradingPair::new("BTC", "USDT"), Timeframe::H1)
    }

    #[test]
    fn test_build_all_registered_strategies() {
        for name in [
            "dual_ma",
            "rsi_reversion",
            "bollinger_breakout",
            "triple_ma",
            "macd_divergence",
        ] {
            let strategy = build(&request(name)).unwrap_or_else(|error| {
                panic!("building {name} failed: {error}");
            });
            assert_eq!(strategy.metadata().name, name);
            assert!(strategy.metadata().startup_candle_count > 0);
        }
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        assert!(matches!(
            build(&request("hodl")),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_params_forwarded() {
        let request = request("dual_ma").with_params(json!({
            "fast_period": 3,
            "slow_period": 9,
        }));
        let strategy = build(&request).unwrap();
        assert_eq!(strategy.metadata().startup_candle_count, 10);
    }

    #[test]
    fn test_unknown_param_field_rejected() {
        let request = request("dual_ma").with_params(json!({
            "fast_period": 3,
            "turbo": true,
        }));
        assert!(matches!(build(&request), Err(EngineError::Validation(_))));
    }
}
