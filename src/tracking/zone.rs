use crate::common::{Point, Polygon};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    #[default]
    None,
    Door,
    Inside,
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Zone::None => "none",
            Zone::Door => "door",
            Zone::Inside => "inside",
        };
        f.write_str(name)
    }
}

/// What a zone change between two frames means for occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Entry,
    Exit,
    Other,
}

impl Transition {
    pub fn between(previous: Zone, current: Zone) -> Self {
        match (previous, current) {
            (Zone::Door, Zone::Inside) => Transition::Entry,
            (Zone::Inside, Zone::Door) => Transition::Exit,
            _ => Transition::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZoneMap {
    door: Polygon,
    inside: Polygon,
}

impl ZoneMap {
    pub fn new(door: Polygon, inside: Polygon) -> Self {
        Self { door, inside }
    }

    /// INSIDE wins over DOOR where the regions overlap.
    pub fn classify(&self, point: Point) -> Zone {
        if self.inside.contains(point) {
            Zone::Inside
        } else if self.door.contains(point) {
            Zone::Door
        } else {
            Zone::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zones() -> ZoneMap {
        // door: x in [0, 10], inside: x in [8, 20]; overlap on [8, 10]
        ZoneMap::new(
            Polygon::from(vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]]),
            Polygon::from(vec![[8.0, 0.0], [20.0, 0.0], [20.0, 10.0], [8.0, 10.0]]),
        )
    }

    #[test]
    fn inside_takes_priority_over_door() {
        let zones = zones();
        assert_eq!(zones.classify(Point::new(2.0, 5.0)), Zone::Door);
        assert_eq!(zones.classify(Point::new(9.0, 5.0)), Zone::Inside);
        assert_eq!(zones.classify(Point::new(15.0, 5.0)), Zone::Inside);
        assert_eq!(zones.classify(Point::new(30.0, 5.0)), Zone::None);
    }

    #[test]
    fn only_door_to_inside_is_an_entry() {
        let all = [Zone::None, Zone::Door, Zone::Inside];
        for previous in all {
            for current in all {
                let transition = Transition::between(previous, current);
                let expect_entry = previous == Zone::Door && current == Zone::Inside;
                assert_eq!(transition == Transition::Entry, expect_entry, "{previous} -> {current}");
            }
        }
        assert_eq!(Transition::between(Zone::Inside, Zone::Door), Transition::Exit);
        assert_eq!(Transition::between(Zone::None, Zone::Inside), Transition::Other);
    }
}
