use serde::Deserialize;
use std::collections::HashMap;

/// Marker anchor per district name, as `[lon, lat]`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct CentroidTable(HashMap<String, [f64; 2]>);

impl CentroidTable {
    pub fn lookup(&self, district: &str) -> Option<[f64; 2]> {
        self.0.get(district).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for CentroidTable {
    fn default() -> Self {
        let entries = [
            ("Ciutat Vella", [2.1734, 41.3851]),
            ("Gràcia", [2.15899, 41.4096]),
            ("Horta-Guinardó", [2.1651, 41.4298]),
            ("Eixample", [2.162, 41.3888]),
            ("Les Corts", [2.1319, 41.3818]),
            ("Nou Barris", [2.1774, 41.4416]),
            ("Sant Andreu", [2.1911, 41.4351]),
            ("Sant Martí", [2.1995, 41.4186]),
            ("Sants-Montjuïc", [2.1419, 41.3723]),
            ("Sarrià-Sant Gervasi", [2.1343, 41.401]),
        ];

        Self(
            entries
                .into_iter()
                .map(|(name, coord)| (name.to_string(), coord))
                .collect(),
        )
    }
}
