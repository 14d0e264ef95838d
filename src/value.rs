//! Values exchanged with sandboxed code.
//!
//! Parameters and results are untyped on the Python side, so the host
//! models them as a tagged union. Values cross into the guest as JSON; the
//! shapes JSON cannot carry natively (tensors, images, non-finite floats,
//! opaque guest objects) are wrapped in objects tagged with [`WIRE_TAG`].

use std::collections::BTreeMap;

use serde_json::{json, Map, Number};

use crate::error::{Result, SandboxError};

/// Reserved key marking a tagged wire object.
pub const WIRE_TAG: &str = "__asterr__";

/// A value passed into, or read back from, a sandboxed execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    Tensor(Tensor),
    Image(Image),
    /// `repr()` of a guest object that has no host representation.
    Opaque(String),
}

/// A dense `f32` tensor in row-major order.
///
/// Image tensors follow the `[batch, height, width, channels]` layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// An 8-bit image with interleaved channels in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    channels: u8,
    pixels: Vec<u8>,
}

impl Tensor {
    /// Create a tensor, checking that `data` fills `shape` exactly.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
            .ok_or_else(|| {
                SandboxError::Conversion(format!("tensor of shape {shape:?} is too large"))
            })?;
        if expected != data.len() {
            return Err(SandboxError::Conversion(format!(
                "tensor of shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Convert an image tensor into an [`Image`].
    ///
    /// Accepted shapes are `[1, H, W, C]`, `[1, H, W]`, `[H, W, C]` and
    /// `[H, W]`, with `C` between 1 and 4. A leading size-1 axis is the
    /// batch axis. Each element is scaled by 255, clipped to `[0, 255]`
    /// and truncated.
    pub fn to_image(&self) -> Result<Image> {
        let (height, width, channels) = match *self.shape.as_slice() {
            [1, h, w, c] => (h, w, c),
            [1, h, w] | [h, w] => (h, w, 1),
            [h, w, c] => (h, w, c),
            _ => (0, 0, 0),
        };
        if height == 0 || width == 0 || !(1..=4).contains(&channels) {
            return Err(SandboxError::Conversion(format!(
                "cannot convert tensor of shape {:?} to an image",
                self.shape
            )));
        }

        let pixels = self
            .data
            .iter()
            .map(|v| (255.0 * v).clamp(0.0, 255.0) as u8)
            .collect();

        Image::new(
            dimension(width)?,
            dimension(height)?,
            channels as u8,
            pixels,
        )
    }
}

fn dimension(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| SandboxError::Conversion(format!("dimension {n} is too large")))
}

impl Image {
    /// Create an image, checking the channel count and buffer length.
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Result<Self> {
        if !(1..=4).contains(&channels) {
            return Err(SandboxError::Conversion(format!(
                "images have 1 to 4 channels, got {channels}"
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(channels as usize))
            .ok_or_else(|| {
                SandboxError::Conversion(format!("{width}x{height}x{channels} image is too large"))
            })?;
        if pixels.len() != expected {
            return Err(SandboxError::Conversion(format!(
                "{width}x{height}x{channels} image needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Normalize into a batched image tensor.
    ///
    /// Pixels are divided by 255.0 and a leading batch axis is added:
    /// `[1, H, W]` for single-channel images, `[1, H, W, C]` otherwise.
    pub fn to_tensor(&self) -> Tensor {
        let (h, w) = (self.height as usize, self.width as usize);
        let shape = if self.channels == 1 {
            vec![1, h, w]
        } else {
            vec![1, h, w, self.channels as usize]
        };
        Tensor {
            shape,
            data: self.pixels.iter().map(|p| f32::from(*p) / 255.0).collect(),
        }
    }
}

impl Value {
    /// Encode into the JSON wire representation understood by the guest driver.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Float(f) => match Number::from_f64(*f) {
                Some(n) => serde_json::Value::Number(n),
                None => json!({ WIRE_TAG: "float", "repr": float_repr(*f) }),
            },
            Value::Str(s) => json!(s),
            Value::List(items) => items.iter().map(Value::to_wire).collect(),
            Value::Dict(entries) => {
                let items: Map<String, serde_json::Value> = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_wire()))
                    .collect();
                if items.contains_key(WIRE_TAG) {
                    json!({ WIRE_TAG: "dict", "items": items })
                } else {
                    serde_json::Value::Object(items)
                }
            }
            Value::Tensor(t) => json!({
                WIRE_TAG: "tensor",
                "shape": t.shape,
                "data": t.data,
            }),
            Value::Image(img) => json!({
                WIRE_TAG: "image",
                "width": img.width,
                "height": img.height,
                "channels": img.channels,
                "pixels": img.pixels,
            }),
            Value::Opaque(repr) => json!({ WIRE_TAG: "opaque", "repr": repr }),
        }
    }

    /// Decode from the JSON wire representation.
    pub fn from_wire(wire: serde_json::Value) -> Result<Self> {
        Ok(match wire {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(Value::from_wire)
                    .collect::<Result<_>>()?,
            ),
            serde_json::Value::Object(mut map) => match map.remove(WIRE_TAG) {
                None => Value::Dict(decode_entries(map)?),
                Some(tag) => decode_tagged(tag, map)?,
            },
        })
    }
}

fn decode_entries(map: Map<String, serde_json::Value>) -> Result<BTreeMap<String, Value>> {
    map.into_iter()
        .map(|(k, v)| Ok((k, Value::from_wire(v)?)))
        .collect()
}

fn decode_tagged(tag: serde_json::Value, mut map: Map<String, serde_json::Value>) -> Result<Value> {
    let mut field = |name: &str| {
        map.remove(name).ok_or_else(|| {
            SandboxError::Conversion(format!("tagged value {tag} is missing field '{name}'"))
        })
    };

    match tag.as_str() {
        Some("tensor") => {
            let shape: Vec<usize> = from_field(field("shape")?)?;
            let data: Vec<f32> = from_field(field("data")?)?;
            Ok(Value::Tensor(Tensor::new(shape, data)?))
        }
        Some("image") => {
            let width: u32 = from_field(field("width")?)?;
            let height: u32 = from_field(field("height")?)?;
            let channels: u8 = from_field(field("channels")?)?;
            let pixels: Vec<u8> = from_field(field("pixels")?)?;
            Ok(Value::Image(Image::new(width, height, channels, pixels)?))
        }
        Some("float") => {
            let repr: String = from_field(field("repr")?)?;
            repr.parse::<f64>()
                .map(Value::Float)
                .map_err(|_| SandboxError::Conversion(format!("bad float repr {repr:?}")))
        }
        Some("dict") => match field("items")? {
            serde_json::Value::Object(items) => Ok(Value::Dict(decode_entries(items)?)),
            other => Err(SandboxError::Conversion(format!(
                "tagged dict items must be an object, got {other}"
            ))),
        },
        Some("opaque") => Ok(Value::Opaque(from_field(field("repr")?)?)),
        _ => Err(SandboxError::Conversion(format!("unknown value tag {tag}"))),
    }
}

fn from_field<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| SandboxError::Conversion(e.to_string()))
}

fn float_repr(f: f64) -> &'static str {
    if f.is_nan() {
        "nan"
    } else if f > 0.0 {
        "inf"
    } else {
        "-inf"
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Tensor> for Value {
    fn from(t: Tensor) -> Self {
        Value::Tensor(t)
    }
}

impl From<Image> for Value {
    fn from(img: Image) -> Self {
        Value::Image(img)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_to_image_scales_and_clips() {
        let tensor = Tensor::new(vec![1, 1, 2, 3], vec![0.0, 0.5, 1.0, -0.2, 1.7, 0.999]).unwrap();
        let image = tensor.to_image().unwrap();

        assert_eq!((image.width(), image.height(), image.channels()), (2, 1, 3));
        assert_eq!(image.pixels(), &[0, 127, 255, 0, 255, 254]);
    }

    #[test]
    fn test_tensor_to_image_grayscale() {
        let tensor = Tensor::new(vec![1, 2, 2], vec![0.0, 1.0, 1.0, 0.0]).unwrap();
        let image = tensor.to_image().unwrap();
        assert_eq!(image.channels(), 1);
        assert_eq!(image.pixels(), &[0, 255, 255, 0]);
    }

    #[test]
    fn test_tensor_to_image_rejects_bad_shape() {
        let tensor = Tensor::new(vec![2, 2, 2, 3], vec![0.0; 24]).unwrap();
        assert!(matches!(tensor.to_image(), Err(SandboxError::Conversion(_))));
    }

    #[test]
    fn test_image_to_tensor_adds_batch_axis() {
        let image = Image::new(2, 1, 3, vec![0, 51, 255, 255, 0, 102]).unwrap();
        let tensor = image.to_tensor();
        assert_eq!(tensor.shape(), &[1, 1, 2, 3]);
        assert_eq!(tensor.data()[1], 0.2);
        assert_eq!(tensor.data()[2], 1.0);

        let gray = Image::new(2, 2, 1, vec![0, 255, 255, 0]).unwrap();
        assert_eq!(gray.to_tensor().shape(), &[1, 2, 2]);
    }

    #[test]
    fn test_constructors_check_lengths() {
        assert!(Tensor::new(vec![2, 2], vec![0.0; 3]).is_err());
        assert!(Image::new(2, 2, 3, vec![0; 11]).is_err());
        assert!(Image::new(1, 1, 5, vec![0; 5]).is_err());
    }

    #[test]
    fn test_oversized_dimensions_are_conversion_errors() {
        let err = Tensor::new(vec![1 << 32, 1 << 32, 2], Vec::new()).unwrap_err();
        assert!(matches!(err, SandboxError::Conversion(_)));

        let err = Image::new(1 << 31, 1 << 31, 4, Vec::new()).unwrap_err();
        assert!(matches!(err, SandboxError::Conversion(_)));
    }

    #[test]
    fn test_oversized_wire_values_do_not_panic() {
        let image = json!({
            WIRE_TAG: "image",
            "width": u32::MAX,
            "height": u32::MAX,
            "channels": 4,
            "pixels": []
        });
        assert!(matches!(Value::from_wire(image), Err(SandboxError::Conversion(_))));

        let tensor = json!({
            WIRE_TAG: "tensor",
            "shape": [1u64 << 32, 1u64 << 32, 2],
            "data": []
        });
        assert!(matches!(Value::from_wire(tensor), Err(SandboxError::Conversion(_))));
    }

    #[test]
    fn test_wire_tags_special_values() {
        assert_eq!(
            Value::Float(f64::NAN).to_wire(),
            json!({ WIRE_TAG: "float", "repr": "nan" })
        );

        let decoded = Value::from_wire(json!({ WIRE_TAG: "float", "repr": "-inf" })).unwrap();
        assert_eq!(decoded, Value::Float(f64::NEG_INFINITY));

        let mut reserved = BTreeMap::new();
        reserved.insert(WIRE_TAG.to_string(), Value::Int(1));
        let wire = Value::Dict(reserved.clone()).to_wire();
        assert_eq!(wire[WIRE_TAG], "dict");
        assert_eq!(Value::from_wire(wire).unwrap(), Value::Dict(reserved));
    }

    #[test]
    fn test_wire_decodes_guest_shapes() {
        let wire = json!({
            "count": 3,
            "big": 18446744073709551615u64,
            "image": { WIRE_TAG: "image", "width": 1, "height": 1, "channels": 1, "pixels": [9] },
            "handle": { WIRE_TAG: "opaque", "repr": "<object at 0x1>" },
        });

        let Value::Dict(entries) = Value::from_wire(wire).unwrap() else {
            panic!("expected dict");
        };
        assert_eq!(entries["count"], Value::Int(3));
        assert!(matches!(entries["big"], Value::Float(_)));
        assert_eq!(
            entries["image"],
            Value::Image(Image::new(1, 1, 1, vec![9]).unwrap())
        );
        assert_eq!(entries["handle"], Value::Opaque("<object at 0x1>".into()));
    }

    #[test]
    fn test_wire_rejects_unknown_tag() {
        let err = Value::from_wire(json!({ WIRE_TAG: "module" })).unwrap_err();
        assert!(matches!(err, SandboxError::Conversion(_)));
    }
}
