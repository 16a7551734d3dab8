use std::cell::RefCell;
use std::rc::Rc;

use tracing::error;

/// Tagged uniform payload, dispatched by tag at the recording site.
///
/// This is the one generic entry point for heterogeneous uploads: scalars,
/// fixed-size vectors, flat float arrays (`uLd`, `uS`, ...) and column-major
/// matrix data.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
    FloatArray { components: u8, values: Vec<f32> },
    Mat4 { transpose: bool, values: Vec<f32> },
}

/// One recorded `uniform(...)` call, applied later against the live program.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformCommand {
    pub name: String,
    pub value: UniformValue,
}

/// Shared per-episode queue of uniform commands.
///
/// Script callables capture a handle at compile time and record into it; the
/// orchestrator drains the queue each tick and resolves every name against
/// the currently bound program, never a cached location. Cloning is cheap and
/// shares the same queue.
#[derive(Clone, Default)]
pub struct UniformBatch {
    commands: Rc<RefCell<Vec<UniformCommand>>>,
}

impl UniformBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, name: &str, value: UniformValue) {
        self.commands.borrow_mut().push(UniformCommand {
            name: name.to_string(),
            value,
        });
    }

    /// Takes every pending command, leaving the queue empty.
    pub fn drain(&self) -> Vec<UniformCommand> {
        self.commands.borrow_mut().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.borrow().is_empty()
    }
}

/// Maps a scalar-argument tag (`1f`, `2f`, ..., `1i`) to a value.
pub(crate) fn encode_scalars(tag: &str, args: &[f64]) -> Option<UniformValue> {
    let value = match (tag, args.len()) {
        ("1f", 1) => UniformValue::Float(args[0] as f32),
        ("2f", 2) => UniformValue::Vec2([args[0] as f32, args[1] as f32]),
        ("3f", 3) => UniformValue::Vec3([args[0] as f32, args[1] as f32, args[2] as f32]),
        ("4f", 4) => UniformValue::Vec4([
            args[0] as f32,
            args[1] as f32,
            args[2] as f32,
            args[3] as f32,
        ]),
        ("1i", 1) => UniformValue::Int(args[0] as i32),
        _ => {
            error!(tag, arity = args.len(), "unsupported uniform tag");
            return None;
        }
    };
    Some(value)
}

/// Maps an array-argument tag (`1fv`..`4fv`, `Matrix4fv`) to a value.
pub(crate) fn encode_array(tag: &str, values: Vec<f32>) -> Option<UniformValue> {
    let components = match tag {
        "1fv" => 1,
        "2fv" => 2,
        "3fv" => 3,
        "4fv" => 4,
        "Matrix4fv" => {
            return Some(UniformValue::Mat4 {
                transpose: false,
                values,
            })
        }
        _ => {
            error!(tag, "unsupported uniform array tag");
            return None;
        }
    };
    Some(UniformValue::FloatArray { components, values })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_tags_encode_by_arity() {
        assert_eq!(
            encode_scalars("1f", &[0.5]),
            Some(UniformValue::Float(0.5))
        );
        assert_eq!(
            encode_scalars("3f", &[1.0, 2.0, 3.0]),
            Some(UniformValue::Vec3([1.0, 2.0, 3.0]))
        );
        assert_eq!(encode_scalars("1i", &[7.0]), Some(UniformValue::Int(7)));
    }

    #[test]
    fn mismatched_arity_is_rejected() {
        assert_eq!(encode_scalars("3f", &[1.0]), None);
        assert_eq!(encode_scalars("bogus", &[1.0]), None);
    }

    #[test]
    fn array_tags_carry_component_counts() {
        let encoded = encode_array("3fv", vec![1.0; 6]);
        assert_eq!(
            encoded,
            Some(UniformValue::FloatArray {
                components: 3,
                values: vec![1.0; 6],
            })
        );
    }

    #[test]
    fn drain_empties_the_batch() {
        let batch = UniformBatch::new();
        batch.record("uTime", UniformValue::Float(1.0));
        let shared = batch.clone();
        shared.record("uFrame", UniformValue::Int(2));

        let commands = batch.drain();
        assert_eq!(commands.len(), 2);
        assert!(batch.is_empty());
        assert!(shared.is_empty());
    }
}
