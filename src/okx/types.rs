//! Types and models for the OKX v5 REST API
//!
//! OKX returns every numeric field as a string, often empty when the value
//! does not apply. Parsing helpers turn those into `Option<f64>`.

use serde::{Deserialize, Serialize};

use crate::types::{PositionSide, Symbol};

/// Standard response envelope: `{"code": "0", "msg": "", "data": [...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct OkxResponse<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> OkxResponse<T> {
    pub fn is_ok(&self) -> bool {
        self.code == "0"
    }
}

/// Parse an OKX numeric string; empty strings are `None`
pub fn parse_num(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    value.parse().ok().filter(|v: &f64| v.is_finite())
}

/// Map an instrument name to an OKX swap id
///
/// `"FIL/USDT:USDT"` and `"FIL-USDT"` become `"FIL-USDT-SWAP"`; ids already
/// in OKX form pass through.
pub fn to_inst_id(symbol: &Symbol) -> String {
    let s = symbol.as_str();
    if s.ends_with("-SWAP") {
        return s.to_string();
    }
    let pair = s.split(':').next().unwrap_or(s);
    let mut parts = pair.split(['/', '-']);
    match (parts.next(), parts.next()) {
        (Some(base), Some(quote)) => format!("{base}-{quote}-SWAP"),
        _ => format!("{pair}-USDT-SWAP"),
    }
}

/// OKX `posSide` value for a position side
pub fn pos_side_str(side: PositionSide) -> &'static str {
    match side {
        PositionSide::Long => "long",
        PositionSide::Short => "short",
        PositionSide::None => "net",
    }
}

/// Ticker from `/api/v5/market/ticker`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub inst_id: String,
    #[serde(default)]
    pub last: String,
}

/// Instrument from `/api/v5/public/instruments`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub inst_id: String,
    #[serde(default)]
    pub min_sz: String,
    #[serde(default)]
    pub lot_sz: String,
    #[serde(default)]
    pub tick_sz: String,
    #[serde(default)]
    pub ct_val: String,
}

/// Position from `/api/v5/account/positions`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionData {
    pub inst_id: String,
    #[serde(default)]
    pub pos: String,
    #[serde(default)]
    pub pos_side: String,
    #[serde(default)]
    pub avg_px: String,
    #[serde(default)]
    pub upl: String,
    #[serde(default)]
    pub lever: String,
    #[serde(default)]
    pub liq_px: String,
}

impl PositionData {
    /// Side implied by `posSide`, or by the sign of `pos` in net mode
    pub fn side(&self) -> PositionSide {
        let size = parse_num(&self.pos).unwrap_or(0.0);
        match self.pos_side.as_str() {
            "long" => PositionSide::Long,
            "short" => PositionSide::Short,
            _ if size > 0.0 => PositionSide::Long,
            _ if size < 0.0 => PositionSide::Short,
            _ => PositionSide::None,
        }
    }
}

/// Account balance from `/api/v5/account/balance`
#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    #[serde(default)]
    pub details: Vec<BalanceDetail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDetail {
    pub ccy: String,
    #[serde(default)]
    pub avail_bal: String,
    #[serde(default)]
    pub cash_bal: String,
}

impl BalanceDetail {
    /// Available balance, falling back to cash balance
    pub fn free(&self) -> Option<f64> {
        parse_num(&self.avail_bal).or_else(|| parse_num(&self.cash_bal))
    }
}

/// Resting order from `/api/v5/trade/orders-pending`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOrder {
    pub ord_id: String,
    pub inst_id: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub sz: String,
    #[serde(default)]
    pub px: String,
}

/// Conditional order from `/api/v5/trade/orders-algo-pending`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgoOrder {
    pub algo_id: String,
    pub inst_id: String,
}

/// Per-order result of a trade endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    #[serde(default)]
    pub ord_id: String,
    #[serde(default)]
    pub algo_id: String,
    #[serde(default)]
    pub s_code: String,
    #[serde(default)]
    pub s_msg: String,
}

impl OrderAck {
    pub fn is_ok(&self) -> bool {
        self.s_code.is_empty() || self.s_code == "0"
    }
}

/// Body for `/api/v5/trade/order`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub inst_id: String,
    pub td_mode: String,
    pub side: String,
    pub pos_side: String,
    pub ord_type: String,
    pub sz: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
}

/// Body for `/api/v5/trade/order-algo` (conditional SL or TP)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceAlgoRequest {
    pub inst_id: String,
    pub td_mode: String,
    pub side: String,
    pub pos_side: String,
    pub ord_type: String,
    pub sz: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_trigger_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_ord_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_trigger_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_ord_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
}

/// Body for `/api/v5/trade/cancel-order`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    pub inst_id: String,
    pub ord_id: String,
}

/// Entry in the `/api/v5/trade/cancel-algos` body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAlgoRequest {
    pub algo_id: String,
    pub inst_id: String,
}

/// Body for `/api/v5/account/set-leverage`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLeverageRequest {
    pub inst_id: String,
    pub lever: String,
    pub mgn_mode: String,
    pub pos_side: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_inst_id() {
        assert_eq!(to_inst_id(&Symbol::new("FIL/USDT:USDT")), "FIL-USDT-SWAP");
        assert_eq!(to_inst_id(&Symbol::new("WIF-USDT")), "WIF-USDT-SWAP");
        assert_eq!(to_inst_id(&Symbol::new("ZRO-USDT-SWAP")), "ZRO-USDT-SWAP");
    }

    #[test]
    fn test_parse_num() {
        assert_eq!(parse_num("1.5"), Some(1.5));
        assert_eq!(parse_num(""), None);
        assert_eq!(parse_num("abc"), None);
    }

    #[test]
    fn test_response_envelope() {
        let json = r#"{"code":"0","msg":"","data":[{"instId":"FIL-USDT-SWAP","last":"4.123"}]}"#;
        let resp: OkxResponse<Ticker> = serde_json::from_str(json).unwrap();
        assert!(resp.is_ok());
        assert_eq!(parse_num(&resp.data[0].last), Some(4.123));

        let json = r#"{"code":"51008","msg":"Insufficient balance"}"#;
        let resp: OkxResponse<Ticker> = serde_json::from_str(json).unwrap();
        assert!(!resp.is_ok());
        assert!(resp.data.is_empty());
    }

    #[test]
    fn test_position_side() {
        let json = r#"{"instId":"FIL-USDT-SWAP","pos":"3","posSide":"short","avgPx":"4.1","upl":"0.2","lever":"30","liqPx":""}"#;
        let pos: PositionData = serde_json::from_str(json).unwrap();
        assert_eq!(pos.side(), PositionSide::Short);
        assert_eq!(parse_num(&pos.liq_px), None);

        let json = r#"{"instId":"FIL-USDT-SWAP","pos":"-2","posSide":"net"}"#;
        let pos: PositionData = serde_json::from_str(json).unwrap();
        assert_eq!(pos.side(), PositionSide::Short);
    }

    #[test]
    fn test_balance_fallback() {
        let detail = BalanceDetail {
            ccy: "USDT".into(),
            avail_bal: "".into(),
            cash_bal: "12.5".into(),
        };
        assert_eq!(detail.free(), Some(12.5));
    }

    #[test]
    fn test_algo_request_serialization() {
        let req = PlaceAlgoRequest {
            inst_id: "FIL-USDT-SWAP".into(),
            td_mode: "cross".into(),
            side: "sell".into(),
            pos_side: "long".into(),
            ord_type: "conditional".into(),
            sz: "3".into(),
            sl_trigger_px: Some("3.9".into()),
            sl_ord_px: Some("-1".into()),
            tp_trigger_px: None,
            tp_ord_px: None,
            reduce_only: Some(true),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["slTriggerPx"], "3.9");
        assert_eq!(json["slOrdPx"], "-1");
        assert!(json.get("tpTriggerPx").is_none());
        assert_eq!(json["reduceOnly"], true);
    }
}
