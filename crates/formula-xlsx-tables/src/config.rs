use formula_text_store::{BackendKind, StoreConfig};

/// Default namespace of SpreadsheetML parts.
pub const SPREADSHEETML_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

/// How much of a text-run container a table keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FidelityMode {
    /// Keep the container's children verbatim (runs, run properties, phonetic data).
    Full,
    /// Keep only the concatenated plain text.
    #[default]
    Simplified,
}

/// What the simplified parser does with elements it does not recognise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParseMode {
    /// Log at debug level and skip the subtree.
    #[default]
    Lenient,
    /// Fail the read with [`CodecError::UnexpectedElement`](crate::CodecError::UnexpectedElement).
    Strict,
}

/// Construction-time settings for [`SharedStringsTable`](crate::SharedStringsTable) and
/// [`CommentsTable`](crate::CommentsTable).
#[derive(Debug, Clone)]
pub struct TableConfig {
    pub store: StoreConfig,
    /// Default namespace written on the root element and on rehydrated fragments.
    pub namespace: String,
    pub fidelity: FidelityMode,
    pub parse_mode: ParseMode,
    /// Append `<rPh>` text (space separated) to simplified reads.
    pub include_phonetic_runs: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            namespace: SPREADSHEETML_NS.to_string(),
            fidelity: FidelityMode::default(),
            parse_mode: ParseMode::default(),
            include_phonetic_runs: false,
        }
    }
}

impl TableConfig {
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_backend(mut self, kind: BackendKind) -> Self {
        self.store.kind = kind;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_fidelity(mut self, fidelity: FidelityMode) -> Self {
        self.fidelity = fidelity;
        self
    }

    pub fn with_parse_mode(mut self, parse_mode: ParseMode) -> Self {
        self.parse_mode = parse_mode;
        self
    }

    pub fn with_phonetic_runs(mut self, include: bool) -> Self {
        self.include_phonetic_runs = include;
        self
    }

    pub(crate) fn decode_options(&self) -> crate::codec::DecodeOptions {
        crate::codec::DecodeOptions {
            fidelity: self.fidelity,
            parse_mode: self.parse_mode,
            include_phonetic_runs: self.include_phonetic_runs,
        }
    }
}
