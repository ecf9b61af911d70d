use core::fmt;

use serde::{Deserialize, Serialize};

/// Visual mark attached to a node or edge.
///
/// Tracefiles encode marks as the integer codes `1..=4`; any other code decodes
/// to `None`. `Grey` never appears in a tracefile but is part of the GP2 mark
/// vocabulary, so renderers can rely on the full set.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    #[default]
    None,
    Red,
    Green,
    Blue,
    Grey,
    Dashed,
}

impl Mark {
    /// The canonical lowercase spelling used by graph files and renderers.
    pub const fn as_str(self) -> &'static str {
        match self {
            Mark::None => "none",
            Mark::Red => "red",
            Mark::Green => "green",
            Mark::Blue => "blue",
            Mark::Grey => "grey",
            Mark::Dashed => "dashed",
        }
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A GP2 label: a mark plus an ordered list of textual atoms.
///
/// Atoms are opaque to the replay core; integer/string distinctions only
/// matter to the execution engine that produced the trace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub mark: Mark,
    pub values: Vec<String>,
}

impl Label {
    pub fn new(mark: Mark, values: Vec<String>) -> Self {
        Label { mark, values }
    }
}

impl fmt::Display for Label {
    /// Renders the atom list colon-separated, the way program text spells it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            f.write_str(value)?;
        }
        Ok(())
    }
}
