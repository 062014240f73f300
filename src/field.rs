use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Bumped whenever a statistic is added, removed or renamed. Adding a stat also
/// requires registering its derivation and validation rules.
pub const CATALOG_VERSION: u32 = 1;

pub const FIELD_COUNT: usize = Stat::ALL.len() * 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    BallPossession,
    ExpectedGoals,
    TotalShots,
    ShotsOnTarget,
    ShotsOffTarget,
    BlockedShots,
    ShotsInsideBox,
    ShotsOutsideBox,
    BigChances,
    BigChancesMissed,
    Corners,
    Offsides,
    Fouls,
    YellowCards,
    RedCards,
    TotalPasses,
    AccuratePasses,
    PassAccuracy,
    Tackles,
    Interceptions,
    Clearances,
    Saves,
    Crosses,
    DuelsWon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    /// Running total that only grows during a match.
    Cumulative,
    /// Value in [0, 100].
    Percentage,
    /// Non-negative real value (expected goals).
    Rate,
}

impl Stat {
    pub const ALL: [Stat; 24] = [
        Stat::BallPossession,
        Stat::ExpectedGoals,
        Stat::TotalShots,
        Stat::ShotsOnTarget,
        Stat::ShotsOffTarget,
        Stat::BlockedShots,
        Stat::ShotsInsideBox,
        Stat::ShotsOutsideBox,
        Stat::BigChances,
        Stat::BigChancesMissed,
        Stat::Corners,
        Stat::Offsides,
        Stat::Fouls,
        Stat::YellowCards,
        Stat::RedCards,
        Stat::TotalPasses,
        Stat::AccuratePasses,
        Stat::PassAccuracy,
        Stat::Tackles,
        Stat::Interceptions,
        Stat::Clearances,
        Stat::Saves,
        Stat::Crosses,
        Stat::DuelsWon,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stat::BallPossession => "ball_possession",
            Stat::ExpectedGoals => "expected_goals",
            Stat::TotalShots => "total_shots",
            Stat::ShotsOnTarget => "shots_on_target",
            Stat::ShotsOffTarget => "shots_off_target",
            Stat::BlockedShots => "blocked_shots",
            Stat::ShotsInsideBox => "shots_inside_box",
            Stat::ShotsOutsideBox => "shots_outside_box",
            Stat::BigChances => "big_chances",
            Stat::BigChancesMissed => "big_chances_missed",
            Stat::Corners => "corners",
            Stat::Offsides => "offsides",
            Stat::Fouls => "fouls",
            Stat::YellowCards => "yellow_cards",
            Stat::RedCards => "red_cards",
            Stat::TotalPasses => "total_passes",
            Stat::AccuratePasses => "accurate_passes",
            Stat::PassAccuracy => "pass_accuracy",
            Stat::Tackles => "tackles",
            Stat::Interceptions => "interceptions",
            Stat::Clearances => "clearances",
            Stat::Saves => "saves",
            Stat::Crosses => "crosses",
            Stat::DuelsWon => "duels_won",
        }
    }

    pub fn kind(self) -> StatKind {
        match self {
            Stat::BallPossession | Stat::PassAccuracy => StatKind::Percentage,
            Stat::ExpectedGoals => StatKind::Rate,
            _ => StatKind::Cumulative,
        }
    }

    pub fn is_percentage(self) -> bool {
        self.kind() == StatKind::Percentage
    }

    pub fn is_cumulative(self) -> bool {
        self.kind() == StatKind::Cumulative
    }

    /// Weight used by the confidence score. Possession and shots dominate,
    /// peripheral defensive counts barely move it.
    pub fn importance(self) -> f64 {
        match self {
            Stat::BallPossession => 3.0,
            Stat::TotalShots | Stat::ShotsOnTarget => 2.5,
            Stat::ExpectedGoals => 2.0,
            Stat::BigChances | Stat::Corners => 1.5,
            Stat::TotalPasses | Stat::AccuratePasses | Stat::PassAccuracy => 1.25,
            Stat::ShotsOffTarget
            | Stat::BlockedShots
            | Stat::ShotsInsideBox
            | Stat::ShotsOutsideBox
            | Stat::BigChancesMissed
            | Stat::Fouls
            | Stat::YellowCards
            | Stat::RedCards => 1.0,
            Stat::Offsides
            | Stat::Tackles
            | Stat::Interceptions
            | Stat::Clearances
            | Stat::Saves
            | Stat::Crosses
            | Stat::DuelsWon => 0.75,
        }
    }

    pub fn from_name(raw: &str) -> Option<Stat> {
        let want = raw.trim().to_ascii_lowercase();
        Stat::ALL.into_iter().find(|s| s.name() == want)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Home, Side::Away];

    pub fn suffix(self) -> &'static str {
        match self {
            Side::Home => "home",
            Side::Away => "away",
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Home => Side::Away,
            Side::Away => Side::Home,
        }
    }
}

/// One of the 48 `(stat, side)` slots of a snapshot. Serialised with the
/// stable `{stat}_{side}` name, e.g. `shots_on_target_home`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldKey {
    pub stat: Stat,
    pub side: Side,
}

static FIELDS_BY_NAME: Lazy<HashMap<String, FieldKey>> = Lazy::new(|| {
    FieldKey::all()
        .map(|key| (key.name(), key))
        .collect::<HashMap<_, _>>()
});

impl FieldKey {
    pub fn new(stat: Stat, side: Side) -> Self {
        Self { stat, side }
    }

    pub fn home(stat: Stat) -> Self {
        Self::new(stat, Side::Home)
    }

    pub fn away(stat: Stat) -> Self {
        Self::new(stat, Side::Away)
    }

    /// Catalog order: stat-major, home before away.
    pub fn all() -> impl Iterator<Item = FieldKey> {
        Stat::ALL
            .into_iter()
            .flat_map(|stat| Side::BOTH.into_iter().map(move |side| FieldKey { stat, side }))
    }

    pub fn name(self) -> String {
        format!("{}_{}", self.stat.name(), self.side.suffix())
    }

    pub fn parse(raw: &str) -> Option<FieldKey> {
        FIELDS_BY_NAME.get(raw.trim().to_ascii_lowercase().as_str()).copied()
    }

    pub fn opposite(self) -> FieldKey {
        FieldKey::new(self.stat, self.side.opposite())
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.stat.name(), self.side.suffix())
    }
}

impl From<FieldKey> for String {
    fn from(key: FieldKey) -> Self {
        key.name()
    }
}

impl TryFrom<String> for FieldKey {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        FieldKey::parse(&raw).ok_or_else(|| format!("unknown field name: {raw}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_48_unique_names() {
        let names = FieldKey::all().map(|k| k.name()).collect::<Vec<_>>();
        assert_eq!(names.len(), FIELD_COUNT);
        assert_eq!(FIELD_COUNT, 48);
        let mut dedup = names.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), names.len());
    }

    #[test]
    fn names_parse_back() {
        let key = FieldKey::parse("Shots_On_Target_Away").expect("known");
        assert_eq!(key, FieldKey::away(Stat::ShotsOnTarget));
        assert_eq!(key.to_string(), "shots_on_target_away");
        assert!(FieldKey::parse("shots_on_target").is_none());
        assert!(FieldKey::parse("goals_home").is_none());
    }

    #[test]
    fn field_key_serializes_as_stable_name() {
        let json = serde_json::to_string(&FieldKey::home(Stat::BallPossession)).unwrap();
        assert_eq!(json, "\"ball_possession_home\"");
        let back: FieldKey = serde_json::from_str("\"corners_away\"").unwrap();
        assert_eq!(back, FieldKey::away(Stat::Corners));
    }
}
