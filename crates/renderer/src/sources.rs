use diagnostics::Stage;

/// Fixed prologue prepended to every user shader before compilation.
///
/// It declares the aspect-correcting projection uniform and a value-noise
/// helper that example shaders lean on. The header is never user-editable;
/// diagnostics subtract [`header_line_count`] so markers land on the text the
/// editor actually shows.
pub const SHADER_HEADER: &str = "#version 450
uniform mat4 uAspect;

float noise(vec3 v) {
    float r[8];
    mat4 E = mat4(0., 0., 0., 0., 0., .5, .5, 0., .5, 0., .5, 0., .5, .5, 0., 0.);
    for (int j = 0; j < 2; j++) {
        for (int i = 0; i < 4; i++) {
            vec3 p = .60 * v + E[i].xyz;
            vec3 C = floor(p);
            vec3 P = p - C - .5;
            vec3 A = abs(P);
            C += mod(C.x + C.y + C.z + float(j), 2.) * step(max(A.yzx, A.zxy), A) * sign(P);
            vec3 D = 314.1 * sin(59.2 * float(i + 4 * j) + 65.3 * C + 58.9 * C.yzx + 79.3 * C.zxy);
            P = p - C - .5;
            r[i + 4 * j] = dot(P, fract(D) - .5) * pow(max(0., 1. - 2. * dot(P, P)), 4.);
        }
    }
    return 6.50 * (r[0] + r[1] + r[2] + r[3] + r[4] + r[5] + r[6] + r[7]);
}
";

/// Default user-visible vertex shader: pass-through quad with aspect
/// correction.
pub const DEFAULT_VERTEX_SHADER: &str = "layout(location = 0) in vec3 aPos;
layout(location = 0) out vec3 vPos;

void main() {
    vPos = aPos;
    gl_Position = vec4((uAspect * vec4(aPos, 1.0)).xyz, 1.0);
}
";

/// Default user-visible fragment shader.
pub const DEFAULT_FRAGMENT_SHADER: &str = "layout(location = 0) in vec3 vPos;
layout(location = 0) out vec4 fragColor;

void main() {
    fragColor = vec4(sqrt(abs(vPos)), 1.0);
}
";

/// Default render script: feed the clock to the shader every frame.
pub const DEFAULT_RENDER_SCRIPT: &str = "uniform(\"1f\", \"uTime\", time);\n";

/// Default init script: nothing to set up.
pub const DEFAULT_INIT_SCRIPT: &str = "";

/// Number of lines the header prepends to user shader text.
pub fn header_line_count() -> u32 {
    SHADER_HEADER.lines().count() as u32
}

/// One shader stage's text, always compiled with the fixed header in front.
#[derive(Debug, Clone)]
pub struct ShaderSource {
    stage: Stage,
    body: String,
}

impl ShaderSource {
    pub fn new(stage: Stage, body: impl Into<String>) -> Self {
        Self {
            stage,
            body: body.into(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The user-visible text.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Replaces the body wholesale; returns whether anything changed.
    pub fn set_body(&mut self, body: String) -> bool {
        if self.body == body {
            return false;
        }
        self.body = body;
        true
    }

    /// The full text handed to the compiler: header plus body.
    pub fn effective(&self) -> String {
        format!("{SHADER_HEADER}{}", self.body)
    }
}
