use crate::error::{RelayError, Result};

/// The static set of instrument symbols the relay subscribes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolSet {
    symbols: Vec<String>,
}

impl SymbolSet {
    /// Build a symbol set, uppercasing and de-duplicating while keeping order
    ///
    /// An empty set is a configuration error: the relay has nothing to relay.
    pub fn new<I, S>(symbols: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for symbol in symbols {
            let symbol = symbol.as_ref().trim().to_uppercase();
            if !symbol.is_empty() && !unique.contains(&symbol) {
                unique.push(symbol);
            }
        }

        if unique.is_empty() {
            return Err(RelayError::Config("no symbols configured".to_string()));
        }

        Ok(Self { symbols: unique })
    }

    pub fn as_slice(&self) -> &[String] {
        &self.symbols
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s.eq_ignore_ascii_case(symbol))
    }

    /// Upstream ticker stream names, one per symbol ("btcusdt@ticker")
    pub fn stream_names(&self) -> Vec<String> {
        self.symbols
            .iter()
            .map(|s| format!("{}@ticker", s.to_lowercase()))
            .collect()
    }
}
