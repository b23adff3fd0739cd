//! Writer adapters used when flushing captured output into transcript form.

use std::io::{self, Write};

/// Writer that starts every line with a fixed prefix.
///
/// The separator is written between the prefix and the line content, but is
/// omitted for empty lines, so that e.g. a `"1"` prefix with a `" "` separator
/// renders an empty stdout line as `1\n` rather than `1 \n`.
#[derive(Debug)]
pub(crate) struct PrefixingWriter<W> {
    inner: W,
    prefix: &'static str,
    separator: &'static str,
    at_line_start: bool,
}

impl<W: Write> PrefixingWriter<W> {
    pub fn new(prefix: &'static str, separator: &'static str, writer: W) -> Self {
        Self {
            inner: writer,
            prefix,
            separator,
            at_line_start: true,
        }
    }
}

impl<W: Write> Write for PrefixingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            if self.at_line_start {
                self.inner.write_all(self.prefix.as_bytes())?;
                if buf[written] != b'\n' {
                    self.inner.write_all(self.separator.as_bytes())?;
                }
                self.at_line_start = false;
            }

            let rest = &buf[written..];
            let chunk_len = match rest.iter().position(|&b| b == b'\n') {
                Some(idx) => {
                    self.at_line_start = true;
                    idx + 1
                }
                None => rest.len(),
            };
            self.inner.write_all(&rest[..chunk_len])?;
            written += chunk_len;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixing_normal_lines() -> io::Result<()> {
        let mut buf = vec![];
        let mut writer = PrefixingWriter::new("--", ">>", &mut buf);
        writer.write_all(b"abc\nxyz\n")?;
        assert_eq!(buf, b"-->>abc\n-->>xyz\n");
        Ok(())
    }

    #[test]
    fn prefixing_blank_line_and_unterminated_tail() -> io::Result<()> {
        let mut buf = vec![];
        let mut writer = PrefixingWriter::new("--", ">>", &mut buf);
        writer.write_all(b"abc\n\nxyz")?;
        assert_eq!(buf, b"-->>abc\n--\n-->>xyz");
        Ok(())
    }

    #[test]
    fn prefixing_without_any_newlines() -> io::Result<()> {
        let mut buf = vec![];
        let mut writer = PrefixingWriter::new("--", ">>", &mut buf);
        writer.write_all(b"abc")?;
        assert_eq!(buf, b"-->>abc");
        Ok(())
    }

    #[test]
    fn prefixing_across_split_writes() -> io::Result<()> {
        let mut buf = vec![];
        let mut writer = PrefixingWriter::new("1", " ", &mut buf);
        writer.write_all(b"a")?;
        writer.write_all(b"b\nc\n")?;
        assert_eq!(buf, b"1 ab\n1 c\n");
        Ok(())
    }
}
