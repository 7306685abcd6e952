// Wire Protocol - duck-typed JSON messages with a `type` discriminant
// Field names are lowerCamelCase; the JSON shape is the ground truth

use serde::{Deserialize, Serialize};

use crate::core::clock::ReplayState;
use crate::core::types::{Aggregate, Aggressor, Direction};
use crate::detect::{
    AbsorptionEvent, AbsorptionZone, ConfluenceEvent, CvdPoint, DeltaFlipEvent, ProfileSnapshot,
    StackedImbalanceEvent,
};

/// Initial rightmost placement of a fresh event on the consumer's horizontal
/// time axis. Purely presentational.
pub const FRESH_X: f64 = 0.92;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BubbleMsg {
    pub symbol: String,
    pub bucket_start: u64,
    pub buy_volume: u32,
    pub sell_volume: u32,
    pub delta: i64,
    pub vwap: f64,
    pub dominant_side: Aggressor,
    pub is_significant_imbalance: bool,
    pub x: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvdPointMsg {
    pub timestamp: u64,
    pub value: i64,
    pub x: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileLevelMsg {
    pub price: f64,
    pub buy_volume: u64,
    pub sell_volume: u64,
    pub total_volume: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LvnZoneMsg {
    pub price: f64,
    pub price_low: f64,
    pub price_high: f64,
    pub level_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeProfileMsg {
    pub symbol: String,
    pub levels: Vec<ProfileLevelMsg>,
    pub poc: Option<f64>,
    pub value_area_high: Option<f64>,
    pub value_area_low: Option<f64>,
    pub lvn_zones: Vec<LvnZoneMsg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsorptionMsg {
    pub timestamp: u64,
    pub price: f64,
    pub absorption_type: String,
    pub strength: String,
    pub event_count: u32,
    pub total_absorbed: i64,
    pub delta: i64,
    pub price_change: f64,
    pub at_key_level: bool,
    pub against_trend: bool,
    pub x: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsorptionZoneMsg {
    pub price: f64,
    pub absorption_type: String,
    pub total_absorbed: i64,
    pub event_count: u32,
    pub first_seen: u64,
    pub last_seen: u64,
    pub strength: String,
    pub at_key_level: bool,
    pub against_trend: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsorptionZonesMsg {
    pub symbol: String,
    pub zones: Vec<AbsorptionZoneMsg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaFlipMsg {
    pub timestamp: u64,
    pub direction: Direction,
    pub cvd_before: i64,
    pub cvd_after: i64,
    pub x: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackedImbalanceMsg {
    pub timestamp: u64,
    pub side: Aggressor,
    pub direction: Direction,
    pub level_count: u32,
    pub price_high: f64,
    pub price_low: f64,
    pub total_imbalance: i64,
    pub x: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfluenceMsg {
    pub timestamp: u64,
    pub price: f64,
    pub direction: Direction,
    pub score: u8,
    pub signals: Vec<String>,
    pub x: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalStatsMsg {
    pub count: u32,
    pub bullish_count: u32,
    pub bearish_count: u32,
    pub wins: u32,
    pub losses: u32,
    pub avg_move_1m: f64,
    pub avg_move_5m: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatsMsg {
    pub session_start: u64,
    pub current_price: f64,
    pub session_high: f64,
    pub session_low: f64,
    pub total_volume: u64,
    pub delta_flips: SignalStatsMsg,
    pub absorptions: SignalStatsMsg,
    pub stacked_imbalances: SignalStatsMsg,
    pub confluences: SignalStatsMsg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStatusMsg {
    pub paused: bool,
    pub speed: f64,
    pub virtual_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedMsg {
    pub symbols: Vec<String>,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub message: String,
}

/// Outbound broadcast message. The `type` tag set is fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    Bubble(BubbleMsg),
    CVDPoint(CvdPointMsg),
    VolumeProfile(VolumeProfileMsg),
    Absorption(AbsorptionMsg),
    AbsorptionZones(AbsorptionZonesMsg),
    DeltaFlip(DeltaFlipMsg),
    StackedImbalance(StackedImbalanceMsg),
    Confluence(ConfluenceMsg),
    SessionStats(SessionStatsMsg),
    ReplayStatus(ReplayStatusMsg),
    Connected(ConnectedMsg),
    Error(ErrorMsg),
}

impl WsMessage {
    pub fn bubble(aggregate: &Aggregate) -> Self {
        WsMessage::Bubble(BubbleMsg {
            symbol: aggregate.symbol.clone(),
            bucket_start: aggregate.bucket_start,
            buy_volume: aggregate.buy_volume,
            sell_volume: aggregate.sell_volume,
            delta: aggregate.delta,
            vwap: aggregate.vwap,
            dominant_side: aggregate.dominant_side,
            is_significant_imbalance: aggregate.significant_imbalance,
            x: FRESH_X,
        })
    }

    pub fn cvd_point(point: &CvdPoint) -> Self {
        WsMessage::CVDPoint(CvdPointMsg {
            timestamp: point.timestamp,
            value: point.value,
            x: FRESH_X,
        })
    }

    pub fn volume_profile(symbol: &str, snapshot: &ProfileSnapshot) -> Self {
        WsMessage::VolumeProfile(VolumeProfileMsg {
            symbol: symbol.to_string(),
            levels: snapshot
                .levels
                .iter()
                .map(|level| ProfileLevelMsg {
                    price: level.price,
                    buy_volume: level.buy_volume,
                    sell_volume: level.sell_volume,
                    total_volume: level.total_volume,
                })
                .collect(),
            poc: snapshot.key_levels.as_ref().map(|k| k.poc),
            value_area_high: snapshot.key_levels.as_ref().map(|k| k.value_area_high),
            value_area_low: snapshot.key_levels.as_ref().map(|k| k.value_area_low),
            lvn_zones: snapshot
                .lvn_zones
                .iter()
                .map(|zone| LvnZoneMsg {
                    price: zone.price,
                    price_low: zone.price_low,
                    price_high: zone.price_high,
                    level_count: zone.level_count,
                })
                .collect(),
        })
    }

    pub fn absorption(event: &AbsorptionEvent) -> Self {
        WsMessage::Absorption(AbsorptionMsg {
            timestamp: event.timestamp,
            price: event.price,
            absorption_type: event.kind.as_str().to_string(),
            strength: event.strength.as_str().to_string(),
            event_count: event.event_count,
            total_absorbed: event.total_absorbed,
            delta: event.delta,
            price_change: event.price_change,
            at_key_level: event.at_key_level,
            against_trend: event.against_trend,
            x: FRESH_X,
        })
    }

    pub fn absorption_zones(symbol: &str, zones: &[AbsorptionZone]) -> Self {
        WsMessage::AbsorptionZones(AbsorptionZonesMsg {
            symbol: symbol.to_string(),
            zones: zones
                .iter()
                .map(|zone| AbsorptionZoneMsg {
                    price: zone.price,
                    absorption_type: zone.kind.as_str().to_string(),
                    total_absorbed: zone.total_absorbed,
                    event_count: zone.event_count,
                    first_seen: zone.first_seen,
                    last_seen: zone.last_seen,
                    strength: zone.strength.as_str().to_string(),
                    at_key_level: zone.at_key_level,
                    against_trend: zone.against_trend,
                })
                .collect(),
        })
    }

    pub fn delta_flip(event: &DeltaFlipEvent) -> Self {
        WsMessage::DeltaFlip(DeltaFlipMsg {
            timestamp: event.timestamp,
            direction: event.direction,
            cvd_before: event.cvd_before,
            cvd_after: event.cvd_after,
            x: FRESH_X,
        })
    }

    pub fn stacked_imbalance(event: &StackedImbalanceEvent) -> Self {
        WsMessage::StackedImbalance(StackedImbalanceMsg {
            timestamp: event.timestamp,
            side: event.side,
            direction: event.direction,
            level_count: event.level_count,
            price_high: event.price_high,
            price_low: event.price_low,
            total_imbalance: event.total_imbalance,
            x: FRESH_X,
        })
    }

    pub fn confluence(event: &ConfluenceEvent) -> Self {
        WsMessage::Confluence(ConfluenceMsg {
            timestamp: event.timestamp,
            price: event.price,
            direction: event.direction,
            score: event.score,
            signals: event.signals.clone(),
            x: FRESH_X,
        })
    }

    pub fn session_stats(stats: SessionStatsMsg) -> Self {
        WsMessage::SessionStats(stats)
    }

    pub fn replay_status(state: &ReplayState) -> Self {
        WsMessage::ReplayStatus(ReplayStatusMsg {
            paused: state.paused,
            speed: state.speed,
            virtual_time: state.virtual_ms,
        })
    }

    pub fn connected(symbols: &[String], mode: &str) -> Self {
        WsMessage::Connected(ConnectedMsg {
            symbols: symbols.to_vec(),
            mode: mode.to_string(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        WsMessage::Error(ErrorMsg {
            message: message.into(),
        })
    }
}

/// Inbound control message from a subscriber.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    pub action: String,
    pub speed: Option<f64>,
    pub min_size: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminant_and_camel_case_on_wire() {
        let msg = WsMessage::Bubble(BubbleMsg {
            symbol: "NQ.c.0".to_string(),
            bucket_start: 1000,
            buy_volume: 10,
            sell_volume: 20,
            delta: -10,
            vwap: 100.5,
            dominant_side: Aggressor::Sell,
            is_significant_imbalance: true,
            x: FRESH_X,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"Bubble""#));
        assert!(json.contains(r#""bucketStart":1000"#));
        assert!(json.contains(r#""isSignificantImbalance":true"#));
        assert!(json.contains(r#""dominantSide":"sell""#));
    }

    #[test]
    fn test_every_variant_round_trips() {
        let messages = vec![
            WsMessage::Bubble(BubbleMsg {
                symbol: "NQ.c.0".to_string(),
                bucket_start: 0,
                buy_volume: 1,
                sell_volume: 2,
                delta: -1,
                vwap: 100.0,
                dominant_side: Aggressor::Sell,
                is_significant_imbalance: false,
                x: FRESH_X,
            }),
            WsMessage::CVDPoint(CvdPointMsg {
                timestamp: 1,
                value: -5,
                x: FRESH_X,
            }),
            WsMessage::VolumeProfile(VolumeProfileMsg {
                symbol: "NQ.c.0".to_string(),
                levels: vec![ProfileLevelMsg {
                    price: 100.0,
                    buy_volume: 3,
                    sell_volume: 4,
                    total_volume: 7,
                }],
                poc: Some(100.0),
                value_area_high: Some(101.0),
                value_area_low: Some(99.0),
                lvn_zones: vec![LvnZoneMsg {
                    price: 98.5,
                    price_low: 98.0,
                    price_high: 99.0,
                    level_count: 2,
                }],
            }),
            WsMessage::Absorption(AbsorptionMsg {
                timestamp: 2,
                price: 100.0,
                absorption_type: "buying".to_string(),
                strength: "medium".to_string(),
                event_count: 3,
                total_absorbed: 120,
                delta: 40,
                price_change: -0.25,
                at_key_level: true,
                against_trend: false,
                x: FRESH_X,
            }),
            WsMessage::AbsorptionZones(AbsorptionZonesMsg {
                symbol: "NQ.c.0".to_string(),
                zones: vec![],
            }),
            WsMessage::DeltaFlip(DeltaFlipMsg {
                timestamp: 3,
                direction: Direction::Bearish,
                cvd_before: 400,
                cvd_after: -50,
                x: FRESH_X,
            }),
            WsMessage::StackedImbalance(StackedImbalanceMsg {
                timestamp: 4,
                side: Aggressor::Buy,
                direction: Direction::Bullish,
                level_count: 3,
                price_high: 102.0,
                price_low: 100.0,
                total_imbalance: 25,
                x: FRESH_X,
            }),
            WsMessage::Confluence(ConfluenceMsg {
                timestamp: 5,
                price: 100.0,
                direction: Direction::Bullish,
                score: 2,
                signals: vec!["delta_flip".to_string(), "absorption".to_string()],
                x: FRESH_X,
            }),
            WsMessage::SessionStats(SessionStatsMsg {
                session_start: 0,
                current_price: 100.0,
                session_high: 101.0,
                session_low: 99.0,
                total_volume: 1000,
                delta_flips: SignalStatsMsg::default(),
                absorptions: SignalStatsMsg::default(),
                stacked_imbalances: SignalStatsMsg::default(),
                confluences: SignalStatsMsg::default(),
            }),
            WsMessage::ReplayStatus(ReplayStatusMsg {
                paused: true,
                speed: 2.0,
                virtual_time: 123,
            }),
            WsMessage::Connected(ConnectedMsg {
                symbols: vec!["NQ.c.0".to_string()],
                mode: "demo".to_string(),
            }),
            WsMessage::error("bad request"),
        ];

        for msg in messages {
            let json = serde_json::to_string(&msg).unwrap();
            let back: WsMessage = serde_json::from_str(&json).unwrap();
            assert_eq!(back, msg, "round trip failed for {}", json);
        }
    }

    #[test]
    fn test_client_message_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"set_replay_speed","speed":4.0}"#).unwrap();
        assert_eq!(msg.action, "set_replay_speed");
        assert_eq!(msg.speed, Some(4.0));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"set_min_size","min_size":10}"#).unwrap();
        assert_eq!(msg.min_size, Some(10));
    }
}
