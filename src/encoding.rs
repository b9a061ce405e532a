// 📄 File encoding helpers
// Upstream government files are Latin-1; the consolidated table is written
// UTF-8 and later rewritten Latin-1 by the enricher. All delimited I/O goes
// through an in-memory string with the encoding declared at the call site.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Read a Latin-1 encoded file into a UTF-8 string.
///
/// WINDOWS_1252 is a superset of ISO-8859-1 for every byte the upstream
/// exports actually use, and it never fails to decode.
pub fn read_latin1(path: &Path) -> Result<String> {
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
    Ok(decoded.into_owned())
}

/// Write a string as Latin-1. Unmappable characters are replaced, matching
/// the lossy-replace behavior of the upstream export chain.
pub fn write_latin1(path: &Path, content: &str) -> Result<()> {
    let (encoded, _, _) = encoding_rs::WINDOWS_1252.encode(content);

    fs::write(path, &encoded)
        .with_context(|| format!("Failed to write file: {}", path.display()))
}

/// Read a UTF-8 file, tolerating (and stripping) a leading BOM.
///
/// Falls back to Windows-1252 when the bytes are not valid UTF-8 - the
/// consolidated table is Latin-1 once the enricher has rewritten it, and
/// re-running a stage must not fail on its own prior output.
pub fn read_utf8_bom(path: &Path) -> Result<String> {
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    let content = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            decoded.into_owned()
        }
    };

    Ok(content
        .strip_prefix('\u{feff}')
        .map(|s| s.to_string())
        .unwrap_or(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_latin1_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("latin1.csv");

        let text = "Razao_Social;UF\nAssistência Médica São Paulo;SP\n";
        write_latin1(&path, text).unwrap();

        // On disk the accented characters are single bytes
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.contains(&0xEA)); // ê
        assert!(bytes.contains(&0xE3)); // ã

        assert_eq!(read_latin1(&path).unwrap(), text);
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bom.csv");

        std::fs::write(&path, "\u{feff}CNPJ;Valor\n1;2\n").unwrap();
        assert_eq!(read_utf8_bom(&path).unwrap(), "CNPJ;Valor\n1;2\n");

        std::fs::write(&path, "CNPJ;Valor\n1;2\n").unwrap();
        assert_eq!(read_utf8_bom(&path).unwrap(), "CNPJ;Valor\n1;2\n");
    }

    #[test]
    fn test_utf8_read_falls_back_to_latin1() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rewritten.csv");

        // A Latin-1 file (as left behind by the enricher) must still read
        write_latin1(&path, "RazaoSocial\nSaúde Geração\n").unwrap();
        assert_eq!(read_utf8_bom(&path).unwrap(), "RazaoSocial\nSaúde Geração\n");
    }
}
