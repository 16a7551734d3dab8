//! Script sandbox: turns raw "init" and "render" script text into safely
//! re-invokable callables.
//!
//! User code is arbitrary and frequently mid-edit or broken, so nothing in
//! here ever propagates a script failure to the render loop: a script that
//! fails to parse compiles into a no-op callable (init returns an empty
//! state, render returns its input unchanged), and a script that raises at
//! run time is logged and its state returned as far as it got. Init and
//! render recompile independently of each other.
//!
//! Scripts get exactly two capabilities beyond plain computation: the
//! `uniform(tag, name, ...)` setter, which records into a shared
//! [`UniformBatch`] the host drains against the live GPU program, and the
//! `matrix()` transform stack for scene transforms. `uniform` is the
//! reserved capability name and the only GPU-facing entry point in the
//! script namespace; the state bag `S` carries plain data only, so scripts
//! hold no handle to the GL context and cannot issue draws or resource
//! calls themselves.

use rhai::{Array, Dynamic, Engine, Map, Scope, AST};
use tracing::error;
use transform::MatrixStack;

mod uniform;

pub use uniform::{UniformBatch, UniformCommand, UniformValue};

/// Opaque mutable bag threaded across frames by the orchestrator.
pub type SessionState = Map;

/// Scope variable holding the session state, as scripts see it.
pub const STATE_VAR: &str = "S";
/// Scope constant holding elapsed seconds in render scripts.
pub const TIME_VAR: &str = "time";

/// Upper bound on script operations per invocation, so a runaway loop cannot
/// stall the frame clock indefinitely.
const MAX_SCRIPT_OPERATIONS: u64 = 1_000_000;

struct Compiled {
    engine: Engine,
    ast: AST,
}

fn compile(kind: &str, text: &str, batch: &UniformBatch) -> Option<Compiled> {
    let engine = build_engine(batch);
    match engine.compile(text) {
        Ok(ast) => Some(Compiled { engine, ast }),
        Err(err) => {
            error!(kind, %err, "script failed to parse; installing no-op callable");
            None
        }
    }
}

/// Zero-argument callable producing a fresh [`SessionState`].
pub struct InitCallable {
    inner: Option<Compiled>,
}

impl InitCallable {
    /// Compiles init script text. Never fails: malformed scripts yield a
    /// no-op callable that returns an empty state.
    pub fn compile(text: &str, batch: &UniformBatch) -> Self {
        Self {
            inner: compile("init", text, batch),
        }
    }

    /// Runs the init script against a fresh state container and returns the
    /// container regardless of what happened inside.
    pub fn invoke(&self) -> SessionState {
        let Some(compiled) = &self.inner else {
            return SessionState::new();
        };
        let mut scope = Scope::new();
        scope.push(STATE_VAR, SessionState::new());
        if let Err(err) = compiled
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &compiled.ast)
        {
            error!(%err, "init script raised an error");
        }
        scope.get_value::<SessionState>(STATE_VAR).unwrap_or_default()
    }
}

/// Callable invoked once per frame with `(state, elapsed_seconds)`.
pub struct RenderCallable {
    inner: Option<Compiled>,
}

impl RenderCallable {
    /// Compiles render script text. Never fails: malformed scripts yield a
    /// no-op callable that passes the state through untouched.
    pub fn compile(text: &str, batch: &UniformBatch) -> Self {
        Self {
            inner: compile("render", text, batch),
        }
    }

    /// Runs the render script and returns the possibly-mutated state.
    pub fn invoke(&self, state: SessionState, elapsed_seconds: f64) -> SessionState {
        let Some(compiled) = &self.inner else {
            return state;
        };
        let mut scope = Scope::new();
        scope.push(STATE_VAR, state);
        scope.push_constant(TIME_VAR, elapsed_seconds);
        if let Err(err) = compiled
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &compiled.ast)
        {
            error!(%err, "render script raised an error");
        }
        scope.get_value::<SessionState>(STATE_VAR).unwrap_or_default()
    }
}

/// Builds a script engine with the sandbox API registered.
///
/// Each callable owns its engine; the uniform batch handle is captured by the
/// registered closures so recompiles pick up the episode's current batch.
fn build_engine(batch: &UniformBatch) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(MAX_SCRIPT_OPERATIONS);

    register_uniform_api(&mut engine, batch);
    register_matrix_api(&mut engine);
    engine
}

fn register_uniform_api(engine: &mut Engine, batch: &UniformBatch) {
    // Scripts mix int and float literals freely, as in
    // uniform("2f", "uRes", 800, 600), and native dispatch does not coerce
    // INT to FLOAT. The scalar forms therefore take Dynamic arguments and
    // coerce here; the exactly-typed Array and bool overloads below still win
    // dispatch over these wildcards.
    let record_scalars = |batch: UniformBatch| {
        move |tag: &str, name: &str, args: &[Dynamic]| {
            let mut numbers = Vec::with_capacity(args.len());
            for arg in args {
                match numeric(arg) {
                    Some(number) => numbers.push(number),
                    None => {
                        error!(tag, name, "non-numeric uniform argument");
                        return;
                    }
                }
            }
            if let Some(value) = uniform::encode_scalars(tag, &numbers) {
                batch.record(name, value);
            }
        }
    };

    let record = record_scalars(batch.clone());
    engine.register_fn("uniform", move |tag: &str, name: &str, a: Dynamic| {
        record(tag, name, &[a]);
    });
    let record = record_scalars(batch.clone());
    engine.register_fn(
        "uniform",
        move |tag: &str, name: &str, a: Dynamic, b: Dynamic| {
            record(tag, name, &[a, b]);
        },
    );
    let record = record_scalars(batch.clone());
    engine.register_fn(
        "uniform",
        move |tag: &str, name: &str, a: Dynamic, b: Dynamic, c: Dynamic| {
            record(tag, name, &[a, b, c]);
        },
    );
    let record = record_scalars(batch.clone());
    engine.register_fn(
        "uniform",
        move |tag: &str, name: &str, a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic| {
            record(tag, name, &[a, b, c, d]);
        },
    );

    let shared = batch.clone();
    engine.register_fn("uniform", move |tag: &str, name: &str, values: Array| {
        if let Some(value) = uniform::encode_array(tag, array_to_f32(&values)) {
            shared.record(name, value);
        }
    });

    // The matrix form keeps the explicit transpose flag of the original
    // calling convention: uniform("Matrix4fv", name, false, values).
    let shared = batch.clone();
    engine.register_fn(
        "uniform",
        move |tag: &str, name: &str, transpose: bool, values: Array| {
            if tag == "Matrix4fv" {
                shared.record(
                    name,
                    UniformValue::Mat4 {
                        transpose,
                        values: array_to_f32(&values),
                    },
                );
            } else {
                error!(tag, "unsupported uniform tag for matrix form");
            }
        },
    );
}

fn register_matrix_api(engine: &mut Engine) {
    engine
        .register_type_with_name::<MatrixStack>("Matrix")
        .register_fn("matrix", MatrixStack::new)
        .register_fn("identity", MatrixStack::identity)
        .register_fn("save", MatrixStack::save)
        .register_fn("restore", MatrixStack::restore)
        .register_fn("translate", |m: &mut MatrixStack, x: f64, y: f64, z: f64| {
            m.translate([x as f32, y as f32, z as f32]);
        })
        .register_fn("scale", |m: &mut MatrixStack, x: f64, y: f64, z: f64| {
            m.scale([x as f32, y as f32, z as f32]);
        })
        .register_fn("rot_x", |m: &mut MatrixStack, theta: f64| {
            m.rot_x(theta as f32);
        })
        .register_fn("rot_y", |m: &mut MatrixStack, theta: f64| {
            m.rot_y(theta as f32);
        })
        .register_fn("rot_z", |m: &mut MatrixStack, theta: f64| {
            m.rot_z(theta as f32);
        })
        .register_fn("get", |m: &mut MatrixStack| -> Array {
            m.get()
                .iter()
                .map(|value| Dynamic::from_float(f64::from(*value)))
                .collect()
        });
}

fn numeric(value: &Dynamic) -> Option<f64> {
    value
        .as_float()
        .ok()
        .or_else(|| value.as_int().ok().map(|v| v as f64))
}

fn array_to_f32(values: &Array) -> Vec<f32> {
    values
        .iter()
        .map(|value| {
            value
                .as_float()
                .map(|v| v as f32)
                .or_else(|_| value.as_int().map(|v| v as f32))
                .unwrap_or(0.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_builds_a_fresh_state() {
        let batch = UniformBatch::new();
        let init = InitCallable::compile("S.counter = 0;", &batch);
        let state = init.invoke();
        assert_eq!(state.get("counter").and_then(|v| v.as_int().ok()), Some(0));
    }

    #[test]
    fn render_mutates_state_across_invocations() {
        let batch = UniformBatch::new();
        let init = InitCallable::compile("S.counter = 0;", &batch);
        let render = RenderCallable::compile("S.counter = S.counter + 1;", &batch);

        let mut state = init.invoke();
        for _ in 0..5 {
            state = render.invoke(state, 0.016);
        }
        assert_eq!(state.get("counter").and_then(|v| v.as_int().ok()), Some(5));
    }

    #[test]
    fn malformed_init_degrades_to_an_empty_state() {
        let batch = UniformBatch::new();
        let init = InitCallable::compile("let = ;", &batch);
        assert!(init.invoke().is_empty());
    }

    #[test]
    fn malformed_render_passes_state_through() {
        let batch = UniformBatch::new();
        let render = RenderCallable::compile("fn (", &batch);

        let mut state = SessionState::new();
        state.insert("alive".into(), Dynamic::from_int(1));
        let state = render.invoke(state, 1.0);
        assert_eq!(state.get("alive").and_then(|v| v.as_int().ok()), Some(1));
    }

    #[test]
    fn throwing_render_keeps_prior_mutations() {
        let batch = UniformBatch::new();
        let render =
            RenderCallable::compile("S.progress = time; throw \"boom\";", &batch);

        let state = render.invoke(SessionState::new(), 2.5);
        assert_eq!(
            state.get("progress").and_then(|v| v.as_float().ok()),
            Some(2.5)
        );
    }

    #[test]
    fn throwing_init_still_returns_the_container() {
        let batch = UniformBatch::new();
        let init = InitCallable::compile("S.ok = true; throw 42;", &batch);
        let state = init.invoke();
        assert_eq!(state.get("ok").and_then(|v| v.as_bool().ok()), Some(true));
    }

    #[test]
    fn uniform_calls_are_recorded_into_the_batch() {
        let batch = UniformBatch::new();
        let render = RenderCallable::compile(
            "uniform(\"1f\", \"uTime\", time);\n\
             uniform(\"3f\", \"uColor\", 1.0, 0.5, 0.25);\n\
             uniform(\"1i\", \"uFrame\", 3);",
            &batch,
        );
        render.invoke(SessionState::new(), 1.5);

        let commands = batch.drain();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].name, "uTime");
        assert_eq!(commands[0].value, UniformValue::Float(1.5));
        assert_eq!(commands[1].value, UniformValue::Vec3([1.0, 0.5, 0.25]));
        assert_eq!(commands[2].value, UniformValue::Int(3));
    }

    #[test]
    fn integer_arguments_coerce_in_scalar_uniforms() {
        let batch = UniformBatch::new();
        let render = RenderCallable::compile(
            "uniform(\"2f\", \"uRes\", 800, 600);\n\
             uniform(\"3f\", \"uMix\", 1, 0.5, 0);\n\
             uniform(\"4f\", \"uQuad\", 1, 2, 3, 4);\n\
             S.after = 1;",
            &batch,
        );
        let state = render.invoke(SessionState::new(), 0.0);
        // The script ran to completion past every call.
        assert_eq!(state.get("after").and_then(|v| v.as_int().ok()), Some(1));

        let commands = batch.drain();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].value, UniformValue::Vec2([800.0, 600.0]));
        assert_eq!(commands[1].value, UniformValue::Vec3([1.0, 0.5, 0.0]));
        assert_eq!(commands[2].value, UniformValue::Vec4([1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn non_numeric_uniform_arguments_are_dropped() {
        let batch = UniformBatch::new();
        let render = RenderCallable::compile(
            "uniform(\"2f\", \"uRes\", \"wide\", 600); S.after = 1;",
            &batch,
        );
        let state = render.invoke(SessionState::new(), 0.0);
        assert_eq!(state.get("after").and_then(|v| v.as_int().ok()), Some(1));
        assert!(batch.is_empty());
    }

    #[test]
    fn float_array_uniforms_flatten_script_arrays() {
        let batch = UniformBatch::new();
        let render = RenderCallable::compile(
            "uniform(\"3fv\", \"uLd\", [0.57, 0.57, 0.57, -0.57, -0.57, -0.57]);",
            &batch,
        );
        render.invoke(SessionState::new(), 0.0);

        let commands = batch.drain();
        assert_eq!(commands.len(), 1);
        match &commands[0].value {
            UniformValue::FloatArray { components, values } => {
                assert_eq!(*components, 3);
                assert_eq!(values.len(), 6);
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn matrix_stack_is_available_to_scripts() {
        let batch = UniformBatch::new();
        let render = RenderCallable::compile(
            "let m = matrix();\n\
             m.rot_y(time);\n\
             m.save();\n\
             m.translate(1.0, 0.0, 0.0);\n\
             m.restore();\n\
             uniform(\"Matrix4fv\", \"uModel\", false, m.get());",
            &batch,
        );
        render.invoke(SessionState::new(), 0.0);

        let commands = batch.drain();
        assert_eq!(commands.len(), 1);
        match &commands[0].value {
            UniformValue::Mat4 { transpose, values } => {
                assert!(!transpose);
                assert_eq!(values.len(), 16);
                // time == 0 so the restored top is the identity.
                assert!((values[0] - 1.0).abs() < 1e-6);
                assert!((values[12]).abs() < 1e-6);
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn unknown_tags_are_dropped() {
        let batch = UniformBatch::new();
        let render = RenderCallable::compile("uniform(\"9z\", \"uOops\", 1.0);", &batch);
        render.invoke(SessionState::new(), 0.0);
        assert!(batch.is_empty());
    }

    #[test]
    fn recompiling_render_does_not_disturb_init() {
        let batch = UniformBatch::new();
        let init = InitCallable::compile("S.seed = 7;", &batch);
        let _first = RenderCallable::compile("S.seed = S.seed + 1;", &batch);
        let _second = RenderCallable::compile("S.seed = S.seed + 2;", &batch);
        assert_eq!(
            init.invoke().get("seed").and_then(|v| v.as_int().ok()),
            Some(7)
        );
    }
}
