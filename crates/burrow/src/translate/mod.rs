// Translator — Render a Plan's IR as source code for another runtime
//
// Each Target is a dialect with its own operator table. Translation is a pure
// function of (plan IR, target, config): no counters, no timestamps, no
// iteration over hash maps, so the same inputs always give byte-identical
// text.
//
//   Native  — a listing of the canonical IR (also Plan's Display)
//   TfJs    — a JavaScript function over @tensorflow/tfjs
//   Torch   — a Python function over PyTorch
//
// A primitive the dialect has no equivalent for fails the translation for
// that target with UnsupportedTargetOperation; the plan and other targets are
// unaffected. Translations never feed back into the Plan; callers that want
// to keep them use TranslationCache, a side table keyed by plan fingerprint.
//
// Adding a dialect means adding a Target variant and an operator table. The
// IR does not change.

pub mod native;
mod tfjs;
mod torch;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use burrow_core::{DType, Error, Result, Shape};

use crate::placeholder::PlaceholderId;
use crate::plan::Plan;

/// The closed set of dialects the translator can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Native,
    TfJs,
    Torch,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::Native, Target::TfJs, Target::Torch];

    pub fn name(&self) -> &'static str {
        match self {
            Target::Native => "native",
            Target::TfJs => "tfjs",
            Target::Torch => "torch",
        }
    }

    /// Stable numeric tag used by the envelope.
    pub fn tag(&self) -> u32 {
        match self {
            Target::Native => 1,
            Target::TfJs => 2,
            Target::Torch => 3,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Target> {
        Target::ALL.iter().copied().find(|t| t.tag() == tag)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let target = match s.to_ascii_lowercase().as_str() {
            "native" => Target::Native,
            "tfjs" | "tensorflow.js" | "tensorflowjs" => Target::TfJs,
            "torch" | "pytorch" | "torchscript" => Target::Torch,
            _ => burrow_core::bail!("unknown translation target '{}'", s),
        };
        Ok(target)
    }
}

/// Translated source text for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub target: Target,
    pub source: String,
}

// Configuration

/// Knobs for rendering; none of them change what the code computes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TranslateConfig {
    /// Name of the emitted function (default: the plan name, sanitized).
    pub function_name: Option<String>,
    /// Spaces per indentation level.
    pub indent: usize,
    /// Annotate each statement with its result shape and dtype.
    pub shape_comments: bool,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            function_name: None,
            indent: 2,
            shape_comments: false,
        }
    }
}

impl TranslateConfig {
    pub fn with_function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = Some(name.into());
        self
    }

    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn with_shape_comments(mut self, on: bool) -> Self {
        self.shape_comments = on;
        self
    }

    fn digest(&self) -> u64 {
        fnv_hash(format!("{:?}", self).as_bytes())
    }
}

/// Translate `plan` for `target` with the default config.
pub fn translate(plan: &Plan, target: Target) -> Result<Translation> {
    translate_with(plan, target, &TranslateConfig::default())
}

pub fn translate_with(plan: &Plan, target: Target, config: &TranslateConfig) -> Result<Translation> {
    let source = match target {
        Target::Native => native::listing(plan, config),
        Target::TfJs => tfjs::emit(plan, config)?,
        Target::Torch => torch::emit(plan, config)?,
    };
    log::debug!(
        "translated plan '{}' to {}: {} op(s), {} byte(s)",
        plan.name(),
        target,
        plan.ops().len(),
        source.len()
    );
    Ok(Translation { target, source })
}

// Translation cache

/// Identity of a translation: which IR, which dialect, which config.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TranslationKey {
    pub plan_hash: u64,
    pub target: Target,
    pub config_hash: u64,
}

impl TranslationKey {
    pub fn new(plan: &Plan, target: Target, config: &TranslateConfig) -> Self {
        Self {
            plan_hash: fingerprint(plan),
            target,
            config_hash: config.digest(),
        }
    }
}

/// Side table of translations, shared across threads.
///
/// Failed translations are not cached; asking again retries.
pub struct TranslationCache {
    entries: Mutex<HashMap<TranslationKey, Arc<Translation>>>,
}

impl TranslationCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_translate(
        &self,
        plan: &Plan,
        target: Target,
        config: &TranslateConfig,
    ) -> Result<Arc<Translation>> {
        let key = TranslationKey::new(plan, target, config);
        if let Some(hit) = self.lock().get(&key) {
            return Ok(hit.clone());
        }
        let built = Arc::new(translate_with(plan, target, config)?);
        Ok(self.lock().entry(key).or_insert(built).clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TranslationKey, Arc<Translation>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash of the plan's canonical listing. Equal IR gives equal fingerprints
/// regardless of how or where the plan was built.
pub fn fingerprint(plan: &Plan) -> u64 {
    fnv_hash(native::listing(plan, &TranslateConfig::default()).as_bytes())
}

fn fnv_hash(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

// Shared emitter helpers

/// Turn an arbitrary name into an identifier: ASCII alphanumerics and `_`,
/// never starting with a digit.
pub(crate) fn sanitize_symbol(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (idx, ch) in value.chars().enumerate() {
        let is_valid = ch.is_ascii_alphanumeric() || ch == '_';
        if idx == 0 && ch.is_ascii_digit() {
            out.push('_');
        }
        out.push(if is_valid { ch } else { '_' });
    }
    if out.is_empty() {
        out.push_str("plan");
    }
    out
}

/// Identifier for every placeholder of a plan, unique and not a keyword of
/// the target language.
pub(crate) struct VarNames {
    names: HashMap<PlaceholderId, String>,
}

impl VarNames {
    pub(crate) fn new(plan: &Plan, reserved: &[&str]) -> Self {
        let mut used: HashSet<String> = reserved.iter().map(|s| s.to_string()).collect();
        let mut names = HashMap::new();

        let mut assign = |id: PlaceholderId, base: String| {
            let mut candidate = base.clone();
            if used.contains(&candidate) {
                candidate = format!("{}_{}", base, id.0);
            }
            while used.contains(&candidate) {
                candidate.push('_');
            }
            used.insert(candidate.clone());
            names.insert(id, candidate);
        };

        for p in plan.inputs() {
            let base = p
                .name
                .as_deref()
                .map(sanitize_symbol)
                .unwrap_or_else(|| format!("input_{}", p.id.0));
            assign(p.id, base);
        }
        for (i, p) in plan.state().slots().iter().enumerate() {
            let base = p
                .name
                .as_deref()
                .map(sanitize_symbol)
                .unwrap_or_else(|| format!("state_{}", i));
            assign(p.id, base);
        }
        for op in plan.ops() {
            assign(op.output.id, format!("t{}", op.output.id.0));
        }
        VarNames { names }
    }

    pub(crate) fn get(&self, id: PlaceholderId) -> Result<&str> {
        self.names
            .get(&id)
            .map(String::as_str)
            .ok_or(Error::UndeclaredSymbol { id: id.0 as u64 })
    }
}

/// Line-oriented source builder.
pub(crate) struct CodeWriter {
    out: String,
    unit: String,
    level: usize,
}

impl CodeWriter {
    pub(crate) fn new(indent: usize) -> Self {
        CodeWriter {
            out: String::new(),
            unit: " ".repeat(indent),
            level: 0,
        }
    }

    pub(crate) fn line(&mut self, text: &str) {
        if text.is_empty() {
            self.out.push('\n');
            return;
        }
        for _ in 0..self.level {
            self.out.push_str(&self.unit);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    pub(crate) fn indent(&mut self) {
        self.level += 1;
    }

    pub(crate) fn dedent(&mut self) {
        self.level = self.level.saturating_sub(1);
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }
}

/// Comma-separated dims, e.g. `2, 2`.
pub(crate) fn dims_list(shape: &Shape) -> String {
    shape
        .dims()
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn unsupported(target: Target, op: impl Into<String>) -> Error {
    Error::UnsupportedTargetOperation {
        target: target.name(),
        op: op.into(),
    }
}

/// Format a value of `dtype` so that parsing it back gives the same value.
pub(crate) fn format_number(v: f64, dtype: DType) -> String {
    if !dtype.is_float() {
        return format!("{}", v as i64);
    }
    match dtype {
        DType::F64 => format!("{:?}", v),
        _ => format!("{:?}", v as f32),
    }
}
