//! Declarative uniform bindings.
//!
//! A [`UniformBindingSet`] maps uniform names to value sources. A source is
//! either a constant or a [`ValueProvider`] that is re-evaluated on every
//! activation, so time- or viewport-dependent uniforms never require
//! rebuilding the set.
//!
//! # Example
//!
//! ```ignore
//! let viewport = Rc::new(Cell::new(Vec2::new(800.0, 600.0)));
//! let v = viewport.clone();
//!
//! let mut uniforms = UniformBindingSet::new();
//! uniforms.set("particle_scale_factor", 1.0f32);
//! uniforms.set_provider("viewport_size", ValueProvider::new(move || v.get()));
//!
//! viewport.set(Vec2::new(1024.0, 768.0)); // picked up by the next activation
//! ```

use std::collections::HashMap;
use std::rc::Rc;

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::device::GraphicsDevice;
use crate::error::Error;
use crate::state::StatePart;

/// Supported uniform value types.
#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    F32(f32),
    I32(i32),
    U32(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    F32Array(Vec<f32>),
    Vec4Array(Vec<Vec4>),
}

impl UniformValue {
    /// Get the WGSL type name for this value.
    pub fn wgsl_type(&self) -> String {
        match self {
            UniformValue::F32(_) => "f32".into(),
            UniformValue::I32(_) => "i32".into(),
            UniformValue::U32(_) => "u32".into(),
            UniformValue::Vec2(_) => "vec2<f32>".into(),
            UniformValue::Vec3(_) => "vec3<f32>".into(),
            UniformValue::Vec4(_) => "vec4<f32>".into(),
            UniformValue::Mat4(_) => "mat4x4<f32>".into(),
            // Uniform arrays need a 16 byte stride, so scalars are padded to vec4.
            UniformValue::F32Array(v) => format!("array<vec4<f32>, {}>", v.len()),
            UniformValue::Vec4Array(v) => format!("array<vec4<f32>, {}>", v.len()),
        }
    }

    /// Serialize to bytes in uniform address space layout.
    pub fn to_uniform_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            UniformValue::F32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            UniformValue::I32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            UniformValue::U32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            UniformValue::Vec2(v) => buf.extend_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec3(v) => buf.extend_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec4(v) => buf.extend_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Mat4(m) => buf.extend_from_slice(bytemuck::bytes_of(m)),
            UniformValue::F32Array(values) => {
                for v in values {
                    buf.extend_from_slice(bytemuck::bytes_of(&Vec4::new(*v, 0.0, 0.0, 0.0)));
                }
            }
            UniformValue::Vec4Array(values) => buf.extend_from_slice(bytemuck::cast_slice(values)),
        }
        buf
    }
}

// Conversion traits for ergonomic API
impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::F32(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::I32(v)
    }
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        UniformValue::U32(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        UniformValue::Mat4(v)
    }
}

impl From<Vec<f32>> for UniformValue {
    fn from(v: Vec<f32>) -> Self {
        UniformValue::F32Array(v)
    }
}

impl From<Vec<Vec4>> for UniformValue {
    fn from(v: Vec<Vec4>) -> Self {
        UniformValue::Vec4Array(v)
    }
}

/// Lazily evaluated value.
///
/// Invoked once per read with no memoization. Providers should be free of
/// side effects; they are shared by cloning the handle.
pub struct ValueProvider<T>(Rc<dyn Fn() -> T>);

impl<T> Clone for ValueProvider<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T> std::fmt::Debug for ValueProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ValueProvider(..)")
    }
}

impl<T: 'static> ValueProvider<T> {
    pub fn new(f: impl Fn() -> T + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Provider that always yields `value`.
    pub fn constant(value: T) -> Self
    where
        T: Clone,
    {
        Self::new(move || value.clone())
    }

    /// Evaluate the provider now.
    #[inline]
    pub fn value(&self) -> T {
        (self.0)()
    }

    /// Derive a provider that transforms this one's value on every read.
    pub fn map<U: 'static>(&self, f: impl Fn(T) -> U + 'static) -> ValueProvider<U> {
        let inner = self.clone();
        ValueProvider::new(move || f(inner.value()))
    }
}

/// Model, view and projection matrices supplied by the camera owner.
#[derive(Clone, Debug)]
pub struct MvpProviders {
    pub model: ValueProvider<Mat4>,
    pub view: ValueProvider<Mat4>,
    pub projection: ValueProvider<Mat4>,
}

impl MvpProviders {
    pub fn new(
        model: ValueProvider<Mat4>,
        view: ValueProvider<Mat4>,
        projection: ValueProvider<Mat4>,
    ) -> Self {
        Self {
            model,
            view,
            projection,
        }
    }

    /// Identity model and view with the given projection.
    pub fn projection_only(projection: ValueProvider<Mat4>) -> Self {
        Self::new(
            ValueProvider::constant(Mat4::IDENTITY),
            ValueProvider::constant(Mat4::IDENTITY),
            projection,
        )
    }
}

#[derive(Clone)]
enum UniformSource {
    Constant(UniformValue),
    Provider(ValueProvider<UniformValue>),
}

impl UniformSource {
    fn evaluate(&self) -> UniformValue {
        match self {
            UniformSource::Constant(v) => v.clone(),
            UniformSource::Provider(p) => p.value(),
        }
    }
}

/// Named uniform sources, pushed to the device in insertion order on activation.
#[derive(Clone, Default)]
pub struct UniformBindingSet {
    /// Ordered list of (name, source) pairs.
    values: Vec<(String, UniformSource)>,
    /// Quick lookup by name.
    indices: HashMap<String, usize>,
}

impl UniformBindingSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set seeded with every binding of `other`.
    pub fn from_set(other: &UniformBindingSet) -> Self {
        other.clone()
    }

    fn put(&mut self, name: &str, source: UniformSource) {
        if let Some(&idx) = self.indices.get(name) {
            self.values[idx].1 = source;
        } else {
            let idx = self.values.len();
            self.values.push((name.to_string(), source));
            self.indices.insert(name.to_string(), idx);
        }
    }

    /// Add or replace a constant uniform.
    pub fn set<V: Into<UniformValue>>(&mut self, name: &str, value: V) -> &mut Self {
        self.put(name, UniformSource::Constant(value.into()));
        self
    }

    /// Add or replace a uniform read from `provider` on every activation.
    pub fn set_provider<T>(&mut self, name: &str, provider: ValueProvider<T>) -> &mut Self
    where
        T: Into<UniformValue> + 'static,
    {
        let provider = provider.map(|v: T| -> UniformValue { v.into() });
        self.put(name, UniformSource::Provider(provider));
        self
    }

    /// Add or replace a uniform computed by `f` on every activation.
    pub fn set_with<T, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        T: Into<UniformValue> + 'static,
        F: Fn() -> T + 'static,
    {
        self.set_provider(name, ValueProvider::new(f))
    }

    /// Bind `{prefix}modelview_transform` and `{prefix}projection_transform`.
    pub fn set_mvp(&mut self, prefix: &str, mvp: &MvpProviders) -> &mut Self {
        let model = mvp.model.clone();
        let view = mvp.view.clone();
        self.set_with(&format!("{prefix}modelview_transform"), move || {
            view.value() * model.value()
        });
        self.set_provider(&format!("{prefix}projection_transform"), mvp.projection.clone());
        self
    }

    /// Evaluate the current value of a uniform.
    pub fn get(&self, name: &str) -> Option<UniformValue> {
        self.indices.get(name).map(|&idx| self.values[idx].1.evaluate())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Iterate over uniform names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }
}

impl std::fmt::Debug for UniformBindingSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl StatePart for UniformBindingSet {
    fn activate(&mut self, device: &mut dyn GraphicsDevice) -> Result<(), Error> {
        for (name, source) in &self.values {
            device.set_uniform(name, &source.evaluate());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCommand, HeadlessDevice};
    use std::cell::Cell;

    #[test]
    fn test_set_overwrites_existing_name() {
        let mut uniforms = UniformBindingSet::new();
        uniforms.set("red", 1.0f32);
        uniforms.set("green", 0.0f32);
        uniforms.set("red", 0.5f32);

        assert_eq!(uniforms.len(), 2);
        assert_eq!(uniforms.get("red"), Some(UniformValue::F32(0.5)));
        assert_eq!(uniforms.names().collect::<Vec<_>>(), vec!["red", "green"]);
    }

    #[test]
    fn test_provider_replaces_constant() {
        let mut uniforms = UniformBindingSet::new();
        uniforms.set("count", 1u32);
        uniforms.set_with("count", || 7u32);
        assert_eq!(uniforms.len(), 1);
        assert_eq!(uniforms.get("count"), Some(UniformValue::U32(7)));
    }

    #[test]
    fn test_provider_reevaluated_each_activation() {
        let time = Rc::new(Cell::new(0.0f32));
        let t = time.clone();
        let mut uniforms = UniformBindingSet::new();
        uniforms.set_provider("u_Time", ValueProvider::new(move || t.get()));

        let mut device = HeadlessDevice::new();
        uniforms.activate(&mut device).unwrap();
        time.set(2.5);
        uniforms.activate(&mut device).unwrap();

        let pushed: Vec<_> = device
            .commands()
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::SetUniform { name, value } if name == "u_Time" => Some(value.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(pushed, vec![UniformValue::F32(0.0), UniformValue::F32(2.5)]);
    }

    #[test]
    fn test_set_mvp_combines_model_view() {
        let mvp = MvpProviders::new(
            ValueProvider::constant(Mat4::from_translation(Vec3::X)),
            ValueProvider::constant(Mat4::from_scale(Vec3::splat(2.0))),
            ValueProvider::constant(Mat4::IDENTITY),
        );
        let mut uniforms = UniformBindingSet::new();
        uniforms.set_mvp("", &mvp);

        let Some(UniformValue::Mat4(mv)) = uniforms.get("modelview_transform") else {
            panic!("modelview not bound");
        };
        let p = mv.transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-6);
        assert!(uniforms.contains("projection_transform"));
    }

    #[test]
    fn test_from_set_copies_bindings() {
        let mut seed = UniformBindingSet::new();
        seed.set("u_SetOutputs", 1u32);
        let mut derived = UniformBindingSet::from_set(&seed);
        derived.set("viewport_size", Vec2::new(4.0, 3.0));

        assert_eq!(seed.len(), 1);
        assert_eq!(derived.len(), 2);
    }

    #[test]
    fn test_uniform_array_bytes_padded() {
        let value = UniformValue::F32Array(vec![0.0, 1.0, 0.0, 1.0]);
        assert_eq!(value.to_uniform_bytes().len(), 4 * 16);
        assert_eq!(value.wgsl_type(), "array<vec4<f32>, 4>");
        assert_eq!(UniformValue::Mat4(Mat4::IDENTITY).to_uniform_bytes().len(), 64);
        assert_eq!(UniformValue::Vec3(Vec3::ONE).to_uniform_bytes().len(), 12);
    }
}
