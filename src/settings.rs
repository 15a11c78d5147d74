use std::{fmt, str::FromStr};

use crate::{
    catalog::Catalog,
    error::{Error, Result},
};

/// A configurable value stored in the catalog's settings table.
///
/// Each value is resolved from, in order of priority:
/// 1. Its environment variable
/// 2. The value stored with `docshelf config set`
/// 3. The built-in default
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    /// Program used to OCR images.
    OcrCommand,
    /// Language pack passed to the OCR program.
    OcrLanguage,
    /// Program used to convert legacy `.doc` files to text.
    DocCommand,
}

impl SettingKey {
    pub const ALL: [SettingKey; 3] = [
        SettingKey::OcrCommand,
        SettingKey::OcrLanguage,
        SettingKey::DocCommand,
    ];

    pub fn key(self) -> &'static str {
        match self {
            SettingKey::OcrCommand => "ocr_command",
            SettingKey::OcrLanguage => "ocr_language",
            SettingKey::DocCommand => "doc_command",
        }
    }

    pub fn env_var(self) -> &'static str {
        match self {
            SettingKey::OcrCommand => "DOCSHELF_OCR_COMMAND",
            SettingKey::OcrLanguage => "DOCSHELF_OCR_LANGUAGE",
            SettingKey::DocCommand => "DOCSHELF_DOC_COMMAND",
        }
    }

    pub fn default_value(self) -> &'static str {
        match self {
            SettingKey::OcrCommand => "tesseract",
            SettingKey::OcrLanguage => "eng",
            SettingKey::DocCommand => "antiword",
        }
    }

    /// Resolve the effective value and report where it came from.
    pub fn resolve(self, catalog: &Catalog) -> Result<(String, Source)> {
        if let Ok(value) = std::env::var(self.env_var())
            && !value.trim().is_empty()
        {
            return Ok((value, Source::Env));
        }
        if let Some(value) = catalog.get_setting(self.key())? {
            return Ok((value, Source::Stored));
        }
        Ok((self.default_value().to_string(), Source::Default))
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SettingKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().replace('-', "_");
        SettingKey::ALL
            .into_iter()
            .find(|k| k.key() == normalized)
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown setting '{s}' (expected one of: ocr_command, ocr_language, doc_command)"
                ))
            })
    }
}

/// Where a resolved setting value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Env,
    Stored,
    Default,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Env => "env",
            Source::Stored => "stored",
            Source::Default => "default",
        }
    }
}

/// External tools used by the text extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorConfig {
    pub ocr_command: String,
    pub ocr_language: String,
    pub doc_command: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            ocr_command: SettingKey::OcrCommand.default_value().to_string(),
            ocr_language: SettingKey::OcrLanguage.default_value().to_string(),
            doc_command: SettingKey::DocCommand.default_value().to_string(),
        }
    }
}

impl ExtractorConfig {
    pub fn resolve(catalog: &Catalog) -> Result<Self> {
        Ok(Self {
            ocr_command: SettingKey::OcrCommand.resolve(catalog)?.0,
            ocr_language: SettingKey::OcrLanguage.resolve(catalog)?.0,
            doc_command: SettingKey::DocCommand.resolve(catalog)?.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Catalog) {
        let tmp = tempfile::tempdir().unwrap();
        let db = Catalog::open(&tmp.path().join("catalog.redb")).unwrap();
        (tmp, db)
    }

    #[test]
    fn parse_accepts_dashes() {
        assert_eq!(
            "ocr-command".parse::<SettingKey>().unwrap(),
            SettingKey::OcrCommand
        );
        assert_eq!(
            "doc_command".parse::<SettingKey>().unwrap(),
            SettingKey::DocCommand
        );
        assert!("model".parse::<SettingKey>().is_err());
    }

    #[test]
    fn stored_value_overrides_default() {
        let (_tmp, db) = test_db();
        // OcrLanguage is not set in the test environment.
        let (value, source) = SettingKey::OcrLanguage.resolve(&db).unwrap();
        assert_eq!((value.as_str(), source), ("eng", Source::Default));

        db.set_setting("ocr_language", "deu").unwrap();
        let (value, source) = SettingKey::OcrLanguage.resolve(&db).unwrap();
        assert_eq!((value.as_str(), source), ("deu", Source::Stored));
    }

    #[test]
    fn default_config_uses_builtin_tools() {
        let config = ExtractorConfig::default();
        assert_eq!(config.ocr_command, "tesseract");
        assert_eq!(config.doc_command, "antiword");
    }
}
