//! Player and bot entities and the views the API returns.

use serde::{Deserialize, Serialize};

/// A registered player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Player id
    pub id: i64,
    /// Unique player name
    pub name: String,
    /// Owned bots; only filled when loaded with bots
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bots: Vec<Bot>,
}

impl Player {
    /// Player without bots
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            bots: Vec::new(),
        }
    }
}

/// Bot as listed under a player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bot {
    /// Bot id
    pub id: i64,
    /// Display name
    pub name: String,
    /// Base name of the uploaded code file
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
}

/// Bot including its source code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotCode {
    /// Bot id
    pub id: i64,
    /// Display name
    pub name: String,
    /// Base name of the uploaded code file
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    /// Source code
    pub botcode: String,
}

/// Bot together with its owner's name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotWithPlayer {
    /// Bot id
    pub id: i64,
    /// Display name
    pub name: String,
    /// Base name of the uploaded code file
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    /// Owner's name
    pub player_name: String,
}

/// Id and name of a created or deleted bot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSummary {
    /// Bot id
    pub id: i64,
    /// Display name
    pub name: String,
}

/// Request body for `POST /api/players`
#[derive(Debug, Clone, Deserialize)]
pub struct NewPlayer {
    /// Player name
    pub name: String,
}

/// Bot to be added to a player
#[derive(Debug, Clone, Deserialize)]
pub struct NewBot {
    /// Display name
    pub name: String,
    /// Code file name; directories are stripped before storing
    pub filename: String,
    /// Source code
    pub botcode: String,
}
