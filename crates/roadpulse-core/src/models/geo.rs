//! Geographic point model

use serde::{Deserialize, Serialize};

const WKB_POINT: u32 = 1;
const EWKB_SRID_FLAG: u32 = 0x2000_0000;
const EWKB_Z_FLAG: u32 = 0x8000_0000;
const EWKB_M_FLAG: u32 = 0x4000_0000;

/// A WGS84 point (longitude, latitude).
///
/// Serializes as a GeoJSON `Point`. Deserializes from GeoJSON or from the
/// PostGIS EWKB hex string returned for `geography` columns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GeoPointRepr", into = "GeoJsonPoint")]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    /// Build a point, rejecting non-finite or out-of-range coordinates.
    pub fn new(longitude: f64, latitude: f64) -> Result<Self, String> {
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(format!("longitude {longitude} is out of range"));
        }
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(format!("latitude {latitude} is out of range"));
        }
        Ok(Self {
            longitude,
            latitude,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeoJsonPoint {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Vec<f64>,
}

impl From<GeoPoint> for GeoJsonPoint {
    fn from(point: GeoPoint) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: vec![point.longitude, point.latitude],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeoPointRepr {
    GeoJson(GeoJsonPoint),
    Ewkb(String),
}

impl TryFrom<GeoPointRepr> for GeoPoint {
    type Error = String;

    fn try_from(value: GeoPointRepr) -> Result<Self, Self::Error> {
        match value {
            GeoPointRepr::GeoJson(point) => {
                if point.kind != "Point" {
                    return Err(format!("expected GeoJSON Point, got {}", point.kind));
                }
                match point.coordinates.as_slice() {
                    [longitude, latitude] | [longitude, latitude, _] => {
                        Self::new(*longitude, *latitude)
                    }
                    _ => Err("GeoJSON Point needs [longitude, latitude]".to_string()),
                }
            }
            GeoPointRepr::Ewkb(hex) => parse_ewkb_point(&hex),
        }
    }
}

fn parse_ewkb_point(hex: &str) -> Result<GeoPoint, String> {
    let bytes = decode_hex(hex.trim())?;
    let (&byte_order, rest) = bytes
        .split_first()
        .ok_or_else(|| "empty EWKB payload".to_string())?;
    let little_endian = match byte_order {
        0 => false,
        1 => true,
        other => return Err(format!("invalid EWKB byte order {other}")),
    };

    let geometry_type = read_u32(rest, 0, little_endian)?;
    if geometry_type & (EWKB_Z_FLAG | EWKB_M_FLAG) != 0 {
        return Err("EWKB points with Z/M dimensions are not supported".to_string());
    }
    if geometry_type & 0xFFFF != WKB_POINT {
        return Err(format!("expected EWKB Point, got type {geometry_type:#x}"));
    }

    let offset = if geometry_type & EWKB_SRID_FLAG == 0 { 4 } else { 8 };
    let longitude = read_f64(rest, offset, little_endian)?;
    let latitude = read_f64(rest, offset + 8, little_endian)?;
    GeoPoint::new(longitude, latitude)
}

fn read_u32(bytes: &[u8], offset: usize, little_endian: bool) -> Result<u32, String> {
    let raw: [u8; 4] = bytes
        .get(offset..offset + 4)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| "truncated EWKB payload".to_string())?;
    Ok(if little_endian {
        u32::from_le_bytes(raw)
    } else {
        u32::from_be_bytes(raw)
    })
}

fn read_f64(bytes: &[u8], offset: usize, little_endian: bool) -> Result<f64, String> {
    let raw: [u8; 8] = bytes
        .get(offset..offset + 8)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| "truncated EWKB payload".to_string())?;
    Ok(if little_endian {
        f64::from_le_bytes(raw)
    } else {
        f64::from_be_bytes(raw)
    })
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err("EWKB hex must be an even-length ASCII string".to_string());
    }
    (0..hex.len())
        .step_by(2)
        .map(|index| {
            u8::from_str_radix(&hex[index..index + 2], 16)
                .map_err(|_| format!("invalid hex at offset {index}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_geojson() {
        let point = GeoPoint::new(-122.4194, 37.7749).unwrap();
        let json = serde_json::to_value(point).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "Point", "coordinates": [-122.4194, 37.7749] })
        );
    }

    #[test]
    fn parses_geojson_point() {
        let point: GeoPoint =
            serde_json::from_str(r#"{"type":"Point","coordinates":[13.405,52.52]}"#).unwrap();
        assert!((point.longitude - 13.405).abs() < f64::EPSILON);
        assert!((point.latitude - 52.52).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_postgis_ewkb_with_srid() {
        let point: GeoPoint =
            serde_json::from_str(r#""0101000020E610000050FC1873D79A5EC0D0D556EC2FE34240""#)
                .unwrap();
        assert!((point.longitude - -122.4194).abs() < 1e-9);
        assert!((point.latitude - 37.7749).abs() < 1e-9);
    }

    #[test]
    fn parses_big_endian_wkb_without_srid() {
        let point: GeoPoint =
            serde_json::from_str(r#""00000000014004000000000000bff4000000000000""#).unwrap();
        assert!((point.longitude - 2.5).abs() < f64::EPSILON);
        assert!((point.latitude - -1.25).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(GeoPoint::new(181.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -90.5).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
        assert!(serde_json::from_str::<GeoPoint>(r#"{"type":"Point","coordinates":[200,0]}"#)
            .is_err());
    }

    #[test]
    fn rejects_non_point_geometry() {
        assert!(serde_json::from_str::<GeoPoint>(
            r#"{"type":"LineString","coordinates":[1,2]}"#
        )
        .is_err());
        assert!(serde_json::from_str::<GeoPoint>(r#""0102000000""#).is_err());
        assert!(serde_json::from_str::<GeoPoint>(r#""01010000""#).is_err());
    }
}
