use serde::{Deserialize, Deserializer, Serialize};

/// One row of the district boundary file (`/barcelona-distritos.json`).
#[derive(Debug, Clone, Deserialize)]
pub struct DistrictBoundary {
    #[serde(rename = "Codi_Districte", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "nom_districte")]
    pub name: String,
    // POLYGON ((lon lat, lon lat, ...))
    #[serde(rename = "geometria_wgs84")]
    pub polygon_text: String,
}

/// Income per district. `id` holds the number as text, the way it is padded for the join.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IncomeRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "valor")]
    pub value: f64,
    // passed through untouched
    #[serde(rename = "colorIndex")]
    pub color_index: serde_json::Number,
}

/// Per-district figures for one education category.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CategoryStat {
    pub name: String,
    pub total: f64,
    #[serde(default)]
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Infantil,
    Primaria,
    Secundaria,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Infantil, Category::Primaria, Category::Secundaria];

    /// Maps a "selected centre" value onto a category. Anything else is not a category.
    pub fn from_selection(value: &str) -> Option<Self> {
        match value {
            "Infantil" => Some(Category::Infantil),
            "Primaria" => Some(Category::Primaria),
            "Secundària" => Some(Category::Secundaria),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Infantil => "Infantil",
            Category::Primaria => "Primaria",
            Category::Secundaria => "Secundària",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Popup {
    pub offset: u32,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub district: String,
    pub lng_lat: [f64; 2],
    pub color: String,
    pub scale: f64,
    pub popup: Popup,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(number_text(&n)),
        other => Err(serde::de::Error::custom(format!(
            "district id must be a string or a number, got {}",
            other
        ))),
    }
}

/// Integral values print without a fractional part, so `1.0` and `1` both become `"1"`.
fn number_text(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}
