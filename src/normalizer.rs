// 🧹 Normalizer - Comparable keys for noisy provider data
// Company names, street addresses and specialty labels arrive spelled a dozen
// different ways across spreadsheet exports. Every function here maps a raw
// cell to a key used ONLY for equality comparison, never for display.
//
// Contract:
// - Pure and deterministic, no external state (the specialty map is passed in)
// - Idempotent: normalize(normalize(x)) == normalize(x)
// - Unusable input yields None ("no match possible"), never a panic or error

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Separator between the name key and the address key in a combined match key
pub const KEY_SEPARATOR: char = '|';

/// Separator between the parts of an address key
const ADDRESS_PART_SEPARATOR: &str = "-";

// ============================================================================
// SHARED HELPERS
// ============================================================================

/// Strip diacritics: "Pediatrică" → "Pediatrica", "Ștefan" / "Ştefan" → "Stefan"
pub fn fold_diacritics(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Lower-case, fold diacritics, keep only alphanumerics separated by single spaces
fn fold_to_words(s: &str) -> String {
    fold_diacritics(&s.to_lowercase())
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the combined name+address key used by the matcher
pub fn combined_key(name_key: &str, address_key: &str) -> String {
    format!("{}{}{}", name_key, KEY_SEPARATOR, address_key)
}

// ============================================================================
// NAME NORMALIZATION
// ============================================================================

/// Standardized legal form of a company name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegalForm {
    /// Limited liability company (SRL, S.R.L., LTD, LLC ...)
    Srl,
    /// Joint-stock company
    Sa,
    /// General partnership
    Snc,
    /// Limited partnership
    Scs,
    /// Partnership limited by shares
    Sca,
    /// Authorized natural person
    Pfa,
    /// Individual enterprise
    Ii,
    /// Family enterprise
    If,
    /// Individual medical practice (cabinet medical individual)
    Cmi,
}

impl LegalForm {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegalForm::Srl => "srl",
            LegalForm::Sa => "sa",
            LegalForm::Snc => "snc",
            LegalForm::Scs => "scs",
            LegalForm::Sca => "sca",
            LegalForm::Pfa => "pfa",
            LegalForm::Ii => "ii",
            LegalForm::If => "if",
            LegalForm::Cmi => "cmi",
        }
    }

    fn from_token(token: &str) -> Option<LegalForm> {
        match token {
            "srl" | "srld" | "ltd" | "llc" | "gmbh" => Some(LegalForm::Srl),
            "sa" => Some(LegalForm::Sa),
            "snc" => Some(LegalForm::Snc),
            "scs" => Some(LegalForm::Scs),
            "sca" => Some(LegalForm::Sca),
            "pfa" => Some(LegalForm::Pfa),
            "ii" => Some(LegalForm::Ii),
            "if" => Some(LegalForm::If),
            "cmi" => Some(LegalForm::Cmi),
            _ => None,
        }
    }
}

/// Spelled-out legal forms collapsed to their abbreviation before tokens are dropped
const LEGAL_PHRASES: &[(&str, &str)] = &[
    ("societate cu raspundere limitata", "srl"),
    ("societatea cu raspundere limitata", "srl"),
    ("societate pe actiuni", "sa"),
    ("cabinet medical individual", "cmi"),
    ("persoana fizica autorizata", "pfa"),
    ("intreprindere individuala", "ii"),
    ("intreprindere familiala", "if"),
    ("societatea comerciala", "sc"),
    ("societate comerciala", "sc"),
];

/// Legal-entity prefixes that are not a legal form on their own
const LEGAL_PREFIXES: &[&str] = &["sc"];

/// Legal-form spellings peeled off the end of a run of initials, longest first
const LEGAL_SUFFIXES: &[&str] = &[
    "gmbh", "srld", "srl", "snc", "scs", "sca", "pfa", "cmi", "ltd", "llc", "sa", "ii", "if",
];

/// Split legal prefixes/suffixes off a merged run of single letters
///
/// "S.C. A & B S.R.L." merges to "scabsrl"; at the edges of the name this
/// yields ["sc", "ab", "srl"]. The core run is never left empty.
fn peel_legal_affixes(run: String, at_start: bool, at_end: bool) -> Vec<String> {
    let mut core = run.as_str();
    let mut prefix = None;
    let mut suffix = None;

    if at_start {
        if let Some(p) = LEGAL_PREFIXES
            .iter()
            .find(|p| core.len() > p.len() && core.starts_with(*p))
        {
            prefix = Some(p.to_string());
            core = &core[p.len()..];
        }
    }
    if at_end {
        if let Some(s) = LEGAL_SUFFIXES
            .iter()
            .find(|s| core.len() > s.len() && core.ends_with(*s))
        {
            suffix = Some(s.to_string());
            core = &core[..core.len() - s.len()];
        }
    }

    prefix
        .into_iter()
        .chain(std::iter::once(core.to_string()))
        .chain(suffix)
        .collect()
}

/// Standardize already-folded words: initials merged, legal phrases collapsed
fn standardize_words(words: &str) -> Vec<String> {
    let words: Vec<&str> = words.split(' ').filter(|w| !w.is_empty()).collect();

    // Runs of single letters are dotted or spaced abbreviations: "s r l" → "srl"
    let mut tokens: Vec<String> = Vec::new();
    let mut run = String::new();
    let mut run_at_start = false;
    for word in &words {
        let single_letter = word.chars().count() == 1 && word.chars().all(|c| c.is_alphabetic());
        if single_letter {
            if run.is_empty() {
                run_at_start = tokens.is_empty();
            }
            run.push_str(word);
            continue;
        }
        if !run.is_empty() {
            tokens.extend(peel_legal_affixes(std::mem::take(&mut run), run_at_start, false));
        }
        tokens.push(word.to_string());
    }
    if !run.is_empty() {
        tokens.extend(peel_legal_affixes(run, run_at_start, true));
    }

    let mut joined = format!(" {} ", tokens.join(" "));
    for (phrase, abbreviation) in LEGAL_PHRASES {
        joined = joined.replace(&format!(" {} ", phrase), &format!(" {} ", abbreviation));
    }

    joined.split_whitespace().map(str::to_string).collect()
}

/// Tokenize a company name with legal-form spelling variants standardized
///
/// "S.C. Clinica Sante S.R.L." → ["sc", "clinica", "sante", "srl"]
fn standardized_name_tokens(raw: &str) -> Vec<String> {
    standardize_words(&fold_to_words(raw))
}

fn is_legal_token(token: &str) -> bool {
    LEGAL_PREFIXES.contains(&token) || LegalForm::from_token(token).is_some()
}

fn without_legal_tokens(tokens: Vec<String>) -> Vec<String> {
    tokens.into_iter().filter(|t| !is_legal_token(t)).collect()
}

/// Normalize a company name into a match key
///
/// - Lower-case, diacritics folded, punctuation dropped
/// - Legal-form variants standardized, then legal prefixes/suffixes removed
/// - Whitespace collapsed
///
/// Dropping a legal token can leave initials side by side ("A SRL B"), so the
/// pass repeats until the key is stable.
///
/// Returns None when nothing name-like remains (empty, numeric-only, "SC SRL").
///
/// Example: "SC Clinica Sante SRL" → "clinica sante"
pub fn normalize_name(raw: &str) -> Option<String> {
    let mut tokens = without_legal_tokens(standardized_name_tokens(raw));
    loop {
        let next = without_legal_tokens(standardize_words(&tokens.join(" ")));
        if next == tokens {
            break;
        }
        tokens = next;
    }

    if !tokens.iter().any(|t| t.chars().any(|c| c.is_alphabetic())) {
        return None;
    }

    Some(tokens.join(" "))
}

/// Standardized legal form found in a raw company name, if any
///
/// Example: "Clinica Sante S.R.L." → Some(LegalForm::Srl)
pub fn legal_form(raw: &str) -> Option<LegalForm> {
    standardized_name_tokens(raw)
        .iter()
        .find_map(|t| LegalForm::from_token(t))
}

// ============================================================================
// ADDRESS NORMALIZATION
// ============================================================================

/// Canonical street-type token for an abbreviation or spelling variant
fn street_type(token: &str) -> Option<&'static str> {
    match token {
        "str" | "st" | "strd" | "strada" | "street" => Some("strada"),
        "bd" | "bld" | "blvd" | "bdul" | "bul" | "bulev" | "bulevard" | "bulevardul"
        | "boulevard" => Some("bulevardul"),
        "av" | "ave" | "aven" | "avenue" => Some("avenue"),
        "sos" | "sosea" | "soseaua" => Some("soseaua"),
        "cal" | "calea" => Some("calea"),
        "al" | "alee" | "aleea" => Some("aleea"),
        "spl" | "splai" | "splaiul" => Some("splaiul"),
        "int" | "intr" | "intrarea" => Some("intrarea"),
        "pta" | "piata" => Some("piata"),
        _ => None,
    }
}

/// Words that never identify a street on their own
const ADDRESS_STOP_WORDS: &[&str] = &[
    "strada", "bulevardul", "avenue", "soseaua", "calea", "aleea", "splaiul", "intrarea", "piata",
    "nr", "numar", "numarul", "no", "sector", "sectorul", "sect", "sec",
    "bloc", "scara", "etaj", "apartament", "parter",
    "jud", "judet", "judetul", "mun", "municipiul", "oras", "orasul", "com", "comuna",
    "sat", "satul", "loc", "localitatea", "bucuresti", "romania",
];

fn sector_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:sectorul|sector|sect|sec)\s*(\d{1,2})\b|\bs(\d{1,2})\b")
            .expect("sector pattern is valid")
    })
}

fn unit_detail_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:bl|bloc|sc|scara|et|etaj|ap|apartament|cam)(?:\s+[a-z0-9]{1,4}|\d{1,4})\b")
            .expect("unit detail pattern is valid")
    })
}

fn explicit_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:nr|numarul|numar|no)\s*(\d{1,4}[a-z]?)\b")
            .expect("house number pattern is valid")
    })
}

fn bare_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,4}[a-z]?)\b").expect("bare number pattern is valid"))
}

/// Remove the first match of `re` from `text`, returning the captured value
fn take_capture(re: &Regex, text: &mut String) -> Option<String> {
    let (range, value) = {
        let caps = re.captures(text)?;
        let whole = caps.get(0)?;
        let value = caps
            .iter()
            .skip(1)
            .flatten()
            .next()
            .map(|m| m.as_str().to_string())?;
        (whole.range(), value)
    };
    text.replace_range(range, " ");
    Some(value)
}

/// Normalize a street address into a match key
///
/// Key = first significant street word, house number, sector ("s" + number),
/// joined with "-". Missing parts are skipped so separators never repeat.
///
/// Returns None when no significant word exists: missing addresses must never
/// act as a shared key.
///
/// Example: "Str. Exemplu 10, Sector 2" and "Strada Exemplu nr. 10, Sect. 2"
/// both → "exemplu-10-s2"
pub fn normalize_address(raw: &str) -> Option<String> {
    let lowered = fold_diacritics(&raw.to_lowercase())
        .replace("b-dul", "bdul")
        .replace("p-ta", "pta");

    let mut text = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(|w| street_type(w).unwrap_or(w))
        .collect::<Vec<_>>()
        .join(" ");

    let sector = take_capture(sector_regex(), &mut text)
        .and_then(|s| s.parse::<u8>().ok())
        .filter(|s| *s > 0);

    text = unit_detail_regex().replace_all(&text, " ").into_owned();

    let number = take_capture(explicit_number_regex(), &mut text)
        .or_else(|| take_capture(bare_number_regex(), &mut text));

    let word = text.split_whitespace().find(|w| {
        w.chars().count() >= 3
            && w.chars().all(|c| c.is_alphabetic())
            && !ADDRESS_STOP_WORDS.contains(w)
    })?;

    let mut parts = vec![word.to_string()];
    if let Some(number) = number {
        parts.push(number);
    }
    if let Some(sector) = sector {
        parts.push(format!("s{}", sector));
    }

    Some(parts.join(ADDRESS_PART_SEPARATOR))
}

// ============================================================================
// SPECIALTY NORMALIZATION
// ============================================================================

/// Lower-case, trim, collapse internal whitespace
fn clean_label(raw: &str) -> String {
    raw.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lookup key for a label: cleaned and diacritics folded
fn label_key(raw: &str) -> String {
    fold_diacritics(&clean_label(raw))
}

/// Maintained variant → canonical specialty table
///
/// This is data, not code: load it from JSON so new spellings, typos and
/// synonyms can be added without a redeploy.
///
/// ```json
/// {
///   "variants":   { "orl": "otorinolaringologie", "cardiolog": "cardiologie" },
///   "categories": { "radiologie - imagistica medicala": "paraclinical" }
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct SpecialtyMap {
    /// Variant (folded lookup key) → canonical name
    variants: HashMap<String, String>,

    /// Canonical name (folded lookup key) → category label
    categories: HashMap<String, String>,
}

impl SpecialtyMap {
    /// Create an empty map (every label normalizes to itself)
    pub fn new() -> Self {
        SpecialtyMap::default()
    }

    /// Load the map from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read specialty map: {:?}", path.as_ref()))?;

        Self::from_json_str(&content)
    }

    /// Parse the map from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct RawMap {
            #[serde(default)]
            variants: BTreeMap<String, String>,
            #[serde(default)]
            categories: BTreeMap<String, String>,
        }

        let raw: RawMap = serde_json::from_str(json).context("Failed to parse specialty map JSON")?;

        let mut map = SpecialtyMap::from_entries(raw.variants);
        for (canonical, category) in raw.categories {
            map.set_category(&canonical, &category);
        }

        Ok(map)
    }

    /// Build a map from (variant, canonical) pairs
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = SpecialtyMap::new();
        for (variant, canonical) in entries {
            map.insert_raw(variant.as_ref(), canonical.as_ref());
        }
        map.flatten();
        map
    }

    /// Starter table of common spelling variants seen in provider exports
    pub fn with_defaults() -> Self {
        let mut map = SpecialtyMap::from_entries([
            ("cardiolog", "cardiologie"),
            ("cardio", "cardiologie"),
            ("cardiologie adulti", "cardiologie"),
            ("orl", "otorinolaringologie"),
            ("o.r.l.", "otorinolaringologie"),
            ("otorino", "otorinolaringologie"),
            ("ginecologie", "obstetrică-ginecologie"),
            ("obstetrica ginecologie", "obstetrică-ginecologie"),
            ("ob-gin", "obstetrică-ginecologie"),
            ("oftalmolog", "oftalmologie"),
            ("dermatologie", "dermatovenerologie"),
            ("dermato", "dermatovenerologie"),
            ("radiologie", "radiologie - imagistică medicală"),
            ("imagistica", "radiologie - imagistică medicală"),
            ("analize medicale", "medicină de laborator"),
            ("laborator", "medicină de laborator"),
            ("stomatologie", "medicină dentară"),
            ("dentist", "medicină dentară"),
            ("kinetoterapie", "recuperare medicală"),
            ("balneofizioterapie", "recuperare medicală"),
        ]);

        map.set_category("radiologie - imagistică medicală", "paraclinical");
        map.set_category("medicină de laborator", "paraclinical");
        map.set_category("medicină dentară", "dental");
        map.set_category("recuperare medicală", "rehabilitation");
        map
    }

    /// Add or replace a variant mapping
    pub fn insert(&mut self, variant: &str, canonical: &str) {
        self.insert_raw(variant, canonical);
        self.flatten();
    }

    /// Classify a canonical specialty (category label is free text, parsed by the registry)
    pub fn set_category(&mut self, canonical: &str, category: &str) {
        let canonical = self
            .normalize(canonical)
            .unwrap_or_else(|| label_key(canonical));
        self.categories
            .insert(label_key(&canonical), category.trim().to_lowercase());
    }

    /// Category label for a canonical specialty, if one was classified
    pub fn category_for(&self, canonical: &str) -> Option<&str> {
        self.categories.get(&label_key(canonical)).map(String::as_str)
    }

    /// Number of variant entries
    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Normalize a raw specialty label to its canonical name
    ///
    /// Falls back to the cleaned, diacritics-folded label when no mapping exists.
    /// Returns None for empty or letter-less labels.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let key = label_key(raw);
        if !key.chars().any(|c| c.is_alphabetic()) {
            return None;
        }

        Some(self.variants.get(&key).cloned().unwrap_or(key))
    }

    fn insert_raw(&mut self, variant: &str, canonical: &str) {
        let key = label_key(variant);
        let canonical = clean_label(canonical);
        if key.is_empty() || canonical.is_empty() {
            return;
        }
        self.variants.insert(key, canonical);
    }

    /// Resolve chains (a → b, b → c becomes a → c) and map every canonical
    /// name to itself, so normalization is idempotent.
    fn flatten(&mut self) {
        let mut resolved: HashMap<String, String> = HashMap::new();

        for key in self.variants.keys() {
            let mut seen: Vec<String> = vec![key.clone()];
            let mut current = self.variants[key].clone();

            let target = loop {
                let current_key = label_key(&current);
                match self.variants.get(&current_key) {
                    Some(next) if *next != current => {
                        if let Some(pos) = seen.iter().position(|s| *s == current_key) {
                            // Cycle: settle on its smallest member
                            let cycle_min = seen[pos..]
                                .iter()
                                .map(|k| self.variants[k].clone())
                                .min()
                                .unwrap_or_else(|| current.clone());
                            tracing::warn!(variant = %key, "cycle in specialty map, settling on {}", cycle_min);
                            break cycle_min;
                        }
                        seen.push(current_key);
                        current = next.clone();
                    }
                    _ => break current,
                }
            };

            resolved.insert(key.clone(), target);
        }

        let targets: HashSet<String> = resolved.values().cloned().collect();
        for target in targets {
            resolved.insert(label_key(&target), target);
        }

        self.variants = resolved;
    }
}

/// Normalize a specialty label against a maintained mapping
pub fn normalize_specialty(raw: &str, map: &SpecialtyMap) -> Option<String> {
    map.normalize(raw)
}

// ============================================================================
// TESTS
// ============================================================================
