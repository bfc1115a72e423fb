//! Normalization of raw upstream payloads
//!
//! Each source wraps its item list differently: BaseTour responds with a
//! flat `items` array, the other two nest it under
//! `response.body.items.item` (and collapse a single result to a bare
//! object instead of a one-element array). Extraction flattens all of that
//! into a plain item sequence; a missing or malformed envelope yields an
//! empty sequence because "no data this run" is a valid outcome, not an
//! error.
//!
//! Projection is per-source and closed: one typed struct per destination
//! schema, populated leniently (absent, empty, and unparsable values become
//! NULL columns). A failure to map one item is logged and the item dropped;
//! it never fails the batch.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use toursync_common::hash::content_hash;

use crate::source::SourceKind;

/// A flat, typed rendering of one raw upstream item.
///
/// `fields` holds exactly the destination table's projected columns for the
/// record's source (NULLs included). The content hash and the original raw
/// item ride along and are injected into the persisted row as `data_hash`
/// and `raw_data`; the record itself is rebuilt from scratch every run and
/// never persisted.
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub fields: Map<String, Value>,
    pub data_hash: String,
    pub raw: Value,
}

impl NormalizedRecord {
    /// Concatenated key value identifying this record within its table.
    ///
    /// Fields are joined with `_` in declared order; a missing or null key
    /// field contributes an empty string. Records without a usable key
    /// therefore collapse onto the same empty key and collide in the
    /// reconciler's lookup, mirroring upstream rows that lack one.
    pub fn key_value(&self, key_fields: &[&str]) -> String {
        key_fields
            .iter()
            .map(|field| match self.fields.get(*field) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => String::new(),
            })
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Row object for a batch insert: projected columns plus the injected
    /// `data_hash` and `raw_data` audit fields.
    pub fn insert_row(&self) -> Value {
        let mut row = self.fields.clone();
        row.insert("data_hash".to_string(), Value::String(self.data_hash.clone()));
        row.insert("raw_data".to_string(), self.raw.clone());
        Value::Object(row)
    }

    /// Row object for a batch upsert: the insert row carrying forward the
    /// destination row id and stamping the update time.
    pub fn update_row(&self, id: Uuid, updated_at: chrono::DateTime<chrono::Utc>) -> Value {
        let mut row = match self.insert_row() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        row.insert("id".to_string(), Value::String(id.to_string()));
        row.insert("updated_at".to_string(), Value::String(updated_at.to_rfc3339()));
        Value::Object(row)
    }
}

/// Map a decoded envelope into normalized records.
///
/// Never fails the whole batch: items that cannot be mapped are logged and
/// skipped.
pub fn map(kind: SourceKind, envelope: &Value) -> Vec<NormalizedRecord> {
    let items = extract_items(kind, envelope);
    debug!(source = %kind, count = items.len(), "Extracted raw items");

    let mut records = Vec::with_capacity(items.len());
    for item in &items {
        if !item.is_object() {
            warn!(source = %kind, "Skipping non-object item");
            continue;
        }

        match project(kind, item) {
            Ok(fields) => records.push(NormalizedRecord {
                data_hash: content_hash(item),
                raw: item.clone(),
                fields,
            }),
            Err(e) => {
                warn!(source = %kind, error = %e, "Failed to map item, skipping");
            },
        }
    }

    debug!(source = %kind, mapped = records.len(), total = items.len(), "Mapped items");
    records
}

/// Unwrap the source-specific envelope into a plain item sequence.
pub fn extract_items(kind: SourceKind, envelope: &Value) -> Vec<Value> {
    match kind {
        SourceKind::BaseTour => envelope
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        SourceKind::Greentour | SourceKind::BarrierFree => {
            match envelope.pointer("/response/body/items/item") {
                Some(Value::Array(items)) => items.clone(),
                // A single result comes back as a bare object
                Some(Value::Null) | None => Vec::new(),
                Some(single) => vec![single.clone()],
            }
        },
    }
}

fn project(kind: SourceKind, item: &Value) -> serde_json::Result<Map<String, Value>> {
    let projected = match kind {
        SourceKind::Greentour => serde_json::to_value(GreentourRow::from_item(item))?,
        SourceKind::BarrierFree => serde_json::to_value(BarrierFreeRow::from_item(item))?,
        SourceKind::BaseTour => serde_json::to_value(BaseTourRow::from_item(item))?,
    };

    match projected {
        Value::Object(map) => Ok(map),
        _ => Err(serde::ser::Error::custom("projection did not produce an object")),
    }
}

// ============================================================================
// Per-source projections
// ============================================================================

#[derive(Debug, Serialize)]
struct GreentourRow {
    contentid: String,
    areacode: Option<String>,
    sigungucode: Option<String>,
    title: Option<String>,
    addr: Option<String>,
    tel: Option<String>,
    telname: Option<String>,
    mainimage: Option<String>,
    summary: Option<String>,
    createdtime: Option<String>,
    modifiedtime: Option<String>,
    cpyrhtdivcd: Option<String>,
}

impl GreentourRow {
    fn from_item(item: &Value) -> Self {
        Self {
            contentid: text(item, "contentid").unwrap_or_default(),
            areacode: text(item, "areacode"),
            sigungucode: text(item, "sigungucode"),
            title: text(item, "title"),
            addr: text(item, "addr"),
            tel: text(item, "tel"),
            telname: text(item, "telname"),
            mainimage: text(item, "mainimage"),
            summary: text(item, "summary"),
            createdtime: text(item, "createdtime"),
            modifiedtime: text(item, "modifiedtime"),
            cpyrhtdivcd: text(item, "cpyrhtDivCd"),
        }
    }
}

#[derive(Debug, Serialize)]
struct BarrierFreeRow {
    contentid: String,
    contenttypeid: Option<String>,
    areacode: Option<String>,
    sigungucode: Option<String>,
    cat1: Option<String>,
    cat2: Option<String>,
    cat3: Option<String>,
    title: Option<String>,
    addr1: Option<String>,
    addr2: Option<String>,
    tel: Option<String>,
    firstimage: Option<String>,
    firstimage2: Option<String>,
    mapx: Option<f64>,
    mapy: Option<f64>,
    mlevel: Option<i64>,
    zipcode: Option<String>,
    createdtime: Option<String>,
    modifiedtime: Option<String>,
    cpyrhtdivcd: Option<String>,
    lclssystm1: Option<String>,
    lclssystm2: Option<String>,
    lclssystm3: Option<String>,
    ldongregn_cd: Option<String>,
    ldongsigngu_cd: Option<String>,
}

impl BarrierFreeRow {
    fn from_item(item: &Value) -> Self {
        Self {
            contentid: text(item, "contentid").unwrap_or_default(),
            contenttypeid: text(item, "contenttypeid"),
            areacode: text(item, "areacode"),
            sigungucode: text(item, "sigungucode"),
            cat1: text(item, "cat1"),
            cat2: text(item, "cat2"),
            cat3: text(item, "cat3"),
            title: text(item, "title"),
            addr1: text(item, "addr1"),
            addr2: text(item, "addr2"),
            tel: text(item, "tel"),
            firstimage: text(item, "firstimage"),
            firstimage2: text(item, "firstimage2"),
            mapx: float(item, "mapx"),
            mapy: float(item, "mapy"),
            mlevel: int(item, "mlevel"),
            zipcode: text(item, "zipcode"),
            createdtime: text(item, "createdtime"),
            modifiedtime: text(item, "modifiedtime"),
            cpyrhtdivcd: text(item, "cpyrhtDivCd"),
            lclssystm1: text(item, "lclsSystm1"),
            lclssystm2: text(item, "lclsSystm2"),
            lclssystm3: text(item, "lclsSystm3"),
            ldongregn_cd: text(item, "lDongRegnCd"),
            ldongsigngu_cd: text(item, "lDongSignguCd"),
        }
    }
}

#[derive(Debug, Serialize)]
struct BaseTourRow {
    hubtatscode: String,
    baseym: Option<String>,
    areacd: Option<String>,
    areanm: Option<String>,
    signgucd: Option<String>,
    signgunm: Option<String>,
    hubtatsname: Option<String>,
    hubctgrylclsnm: Option<String>,
    hubctgrymclsnm: Option<String>,
    hubrank: Option<i64>,
    mapx: Option<f64>,
    mapy: Option<f64>,
}

impl BaseTourRow {
    fn from_item(item: &Value) -> Self {
        Self {
            hubtatscode: text(item, "hubTatsCd").unwrap_or_default(),
            baseym: text(item, "baseYm"),
            areacd: text(item, "areaCd"),
            areanm: text(item, "areaNm"),
            signgucd: text(item, "signguCd"),
            signgunm: text(item, "signguNm"),
            hubtatsname: text(item, "hubTatsNm"),
            hubctgrylclsnm: text(item, "hubCtgryLclsNm"),
            hubctgrymclsnm: text(item, "hubCtgryMclsNm"),
            hubrank: int(item, "hubRank"),
            mapx: float(item, "mapX"),
            mapy: float(item, "mapY"),
        }
    }
}

// ============================================================================
// Lenient field readers
// ============================================================================

/// Text field: empty strings normalize to NULL, numbers are stringified.
fn text(item: &Value, field: &str) -> Option<String> {
    match item.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Numeric field: empty, whitespace-only, and unparsable input normalize to
/// NULL rather than failing the item.
fn float(item: &Value, field: &str) -> Option<f64> {
    match item.get(field) {
        Some(Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn int(item: &Value, field: &str) -> Option<i64> {
    match item.get(field) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v as i64)),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64))
        },
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested_envelope(item: Value) -> Value {
        json!({
            "response": {
                "header": {"resultCode": "0000", "resultMsg": "OK"},
                "body": {"totalCount": 1, "items": {"item": item}}
            }
        })
    }

    #[test]
    fn test_extract_items_flat_array() {
        let envelope = json!({"items": [{"hubTatsCd": "1"}, {"hubTatsCd": "2"}]});
        assert_eq!(extract_items(SourceKind::BaseTour, &envelope).len(), 2);
    }

    #[test]
    fn test_extract_items_flat_non_array_is_empty() {
        let envelope = json!({"items": {"hubTatsCd": "1"}});
        assert!(extract_items(SourceKind::BaseTour, &envelope).is_empty());

        let missing = json!({"response": {"body": {}}});
        assert!(extract_items(SourceKind::BaseTour, &missing).is_empty());
    }

    #[test]
    fn test_extract_items_nested_array() {
        let envelope = nested_envelope(json!([{"contentid": "1"}, {"contentid": "2"}]));
        assert_eq!(extract_items(SourceKind::Greentour, &envelope).len(), 2);
    }

    #[test]
    fn test_extract_items_nested_single_object_is_wrapped() {
        let envelope = nested_envelope(json!({"contentid": "7"}));
        let items = extract_items(SourceKind::BarrierFree, &envelope);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["contentid"], "7");
    }

    #[test]
    fn test_extract_items_missing_envelope_is_empty_not_error() {
        assert!(extract_items(SourceKind::Greentour, &json!({})).is_empty());
        assert!(extract_items(SourceKind::Greentour, &json!({"response": {}})).is_empty());
        assert!(extract_items(
            SourceKind::Greentour,
            &json!({"response": {"body": {"items": ""}}})
        )
        .is_empty());
    }

    #[test]
    fn test_map_greentour_projects_fixed_schema() {
        let envelope = nested_envelope(json!([{
            "contentid": "126508",
            "areacode": "35",
            "title": "Juwangsan",
            "cpyrhtDivCd": "Type3",
            "unmapped_field": "dropped"
        }]));

        let records = map(SourceKind::Greentour, &envelope);
        assert_eq!(records.len(), 1);

        let fields = &records[0].fields;
        assert_eq!(fields.len(), 12);
        assert_eq!(fields["contentid"], "126508");
        assert_eq!(fields["title"], "Juwangsan");
        assert_eq!(fields["cpyrhtdivcd"], "Type3");
        assert_eq!(fields["tel"], Value::Null);
        assert!(!fields.contains_key("unmapped_field"));
    }

    #[test]
    fn test_map_barrier_free_parses_numeric_fields_leniently() {
        let envelope = nested_envelope(json!([{
            "contentid": "2786391",
            "mapx": "128.9847",
            "mapy": "",
            "mlevel": "6",
            "zipcode": "   "
        }]));

        let records = map(SourceKind::BarrierFree, &envelope);
        let fields = &records[0].fields;
        assert_eq!(fields.len(), 25);
        assert_eq!(fields["mapx"], json!(128.9847));
        assert_eq!(fields["mapy"], Value::Null);
        assert_eq!(fields["mlevel"], json!(6));
        // whitespace-only strings stay as-is for text columns
        assert_eq!(fields["zipcode"], "   ");
    }

    #[test]
    fn test_map_base_tour_renames_camel_case_source_keys() {
        let envelope = json!({"items": [{
            "hubTatsCd": "H001",
            "baseYm": "202506",
            "hubTatsNm": "Hahoe Village",
            "hubRank": "3",
            "mapX": 128.51,
            "mapY": "not-a-number"
        }]});

        let records = map(SourceKind::BaseTour, &envelope);
        let fields = &records[0].fields;
        assert_eq!(fields.len(), 12);
        assert_eq!(fields["hubtatscode"], "H001");
        assert_eq!(fields["baseym"], "202506");
        assert_eq!(fields["hubtatsname"], "Hahoe Village");
        assert_eq!(fields["hubrank"], json!(3));
        assert_eq!(fields["mapx"], json!(128.51));
        assert_eq!(fields["mapy"], Value::Null);
    }

    #[test]
    fn test_map_injects_hash_and_raw() {
        let item = json!({"contentid": "7", "title": "Park"});
        let envelope = nested_envelope(json!([item.clone()]));

        let records = map(SourceKind::Greentour, &envelope);
        assert_eq!(records[0].raw, item);
        assert_eq!(records[0].data_hash.len(), 64);
    }

    #[test]
    fn test_map_skips_non_object_items() {
        let envelope = nested_envelope(json!(["scalar", {"contentid": "1"}]));
        let records = map(SourceKind::Greentour, &envelope);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_map_malformed_envelope_yields_empty_batch() {
        assert!(map(SourceKind::Greentour, &json!({"weird": true})).is_empty());
        assert!(map(SourceKind::BaseTour, &json!({"items": "oops"})).is_empty());
    }

    #[test]
    fn test_key_value_single_and_composite() {
        let envelope = json!({"items": [{"hubTatsCd": "H001", "baseYm": "202506"}]});
        let record = &map(SourceKind::BaseTour, &envelope)[0];
        assert_eq!(record.key_value(SourceKind::BaseTour.key_fields()), "H001_202506");

        let envelope = nested_envelope(json!([{"contentid": "126508"}]));
        let record = &map(SourceKind::Greentour, &envelope)[0];
        assert_eq!(record.key_value(SourceKind::Greentour.key_fields()), "126508");
    }

    #[test]
    fn test_key_value_missing_fields_collapse_to_empty() {
        let envelope = json!({"items": [{"areaNm": "Andong"}]});
        let record = &map(SourceKind::BaseTour, &envelope)[0];
        assert_eq!(record.key_value(SourceKind::BaseTour.key_fields()), "_");
    }

    #[test]
    fn test_insert_row_carries_hash_and_raw_data() {
        let envelope = nested_envelope(json!([{"contentid": "7"}]));
        let record = &map(SourceKind::Greentour, &envelope)[0];

        let row = record.insert_row();
        assert_eq!(row["data_hash"], json!(record.data_hash));
        assert_eq!(row["raw_data"], json!({"contentid": "7"}));
    }

    #[test]
    fn test_update_row_adds_id_and_timestamp() {
        let envelope = nested_envelope(json!([{"contentid": "7"}]));
        let record = &map(SourceKind::Greentour, &envelope)[0];

        let id = Uuid::new_v4();
        let now = chrono::Utc::now();
        let row = record.update_row(id, now);
        assert_eq!(row["id"], json!(id.to_string()));
        assert_eq!(row["updated_at"], json!(now.to_rfc3339()));
        assert_eq!(row["contentid"], "7");
    }
}
