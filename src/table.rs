use std::{
    cell::RefCell,
    collections::VecDeque,
    io::{self, BufRead, BufReader, Read},
    rc::Rc,
};

use csv::StringRecord;
use serde::{Deserialize, Serialize};

use crate::{
    columns::{ColumnAliases, HeaderMap},
    error::{Diagnostics, LoadError, SkipReason, TableKind},
};

/// Field separator of an input table. CMS ships pipe-delimited text; hand
/// made extracts are usually comma separated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delimiter {
    #[default]
    Auto,
    #[serde(alias = "|")]
    Pipe,
    #[serde(alias = ",")]
    Comma,
    #[serde(alias = "\t")]
    Tab,
}

impl Delimiter {
    fn byte(self) -> Option<u8> {
        match self {
            Delimiter::Auto => None,
            Delimiter::Pipe => Some(b'|'),
            Delimiter::Comma => Some(b','),
            Delimiter::Tab => Some(b'\t'),
        }
    }
}

/// Picks the most frequent candidate separator on the first line. Ties and
/// lines without any candidate fall back to pipe.
pub fn sniff_delimiter(head: &[u8]) -> u8 {
    let first_line = head.split(|b| *b == b'\n').next().unwrap_or(head);
    let mut best = (b'|', 0usize);
    for candidate in [b'|', b',', b'\t'] {
        let count = first_line.iter().filter(|b| **b == candidate).count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}

/// Records the byte offset of every newline the CSV layer pulls through it.
/// The csv crate does not count the blank lines it skips, so source line
/// numbers are recovered from these offsets instead.
struct NewlineTracker<R> {
    inner: R,
    offset: u64,
    newlines: Rc<RefCell<VecDeque<u64>>>,
}

impl<R: Read> Read for NewlineTracker<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        let mut newlines = self.newlines.borrow_mut();
        for (i, byte) in buf[..n].iter().enumerate() {
            if *byte == b'\n' {
                newlines.push_back(self.offset + i as u64);
            }
        }
        self.offset += n as u64;
        Ok(n)
    }
}

pub struct Table<R: Read> {
    kind: TableKind,
    reader: csv::Reader<BufReader<NewlineTracker<R>>>,
    headers: HeaderMap,
    newlines: Rc<RefCell<VecDeque<u64>>>,
    lines_passed: u64,
}

impl<R: Read> Table<R> {
    pub fn open(
        source: R,
        kind: TableKind,
        delimiter: Delimiter,
        aliases: &ColumnAliases,
    ) -> Result<Self, LoadError> {
        let newlines = Rc::new(RefCell::new(VecDeque::new()));
        let tracker = NewlineTracker {
            inner: source,
            offset: 0,
            newlines: Rc::clone(&newlines),
        };
        let mut buffered = BufReader::with_capacity(64 * 1024, tracker);
        let separator = match delimiter.byte() {
            Some(b) => b,
            None => {
                let head = buffered
                    .fill_buf()
                    .map_err(|source| LoadError::Io { table: kind, source })?;
                sniff_delimiter(head)
            }
        };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(separator)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(buffered);

        let header_record = reader
            .headers()
            .map_err(|source| LoadError::Csv { table: kind, source })?
            .clone();
        if header_record.iter().all(|h| h.trim().is_empty()) {
            return Err(LoadError::EmptyTable { table: kind });
        }

        let headers = HeaderMap::resolve(kind, &header_record, aliases);
        Ok(Self {
            kind,
            reader,
            headers,
            newlines,
            lines_passed: 0,
        })
    }

    /// 1-based source line of the record just read. The reader's position
    /// sits right after the record, its terminator possibly included, so
    /// the record ends on the line holding the byte before it. Multi-line
    /// quoted records report their last line.
    fn current_line(&mut self) -> u64 {
        let last_byte = self.reader.position().byte().saturating_sub(1);
        let mut newlines = self.newlines.borrow_mut();
        while newlines.front().is_some_and(|&offset| offset < last_byte) {
            newlines.pop_front();
            self.lines_passed += 1;
        }
        self.lines_passed + 1
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Feeds every data row to `handle`. Rows the handler rejects, and rows
    /// the CSV layer cannot decode, are recorded in `diagnostics`; only I/O
    /// failures end the scan.
    pub fn for_each_row<F>(
        mut self,
        diagnostics: &mut Diagnostics,
        mut handle: F,
    ) -> Result<(), LoadError>
    where
        F: FnMut(&HeaderMap, &StringRecord) -> Result<(), SkipReason>,
    {
        let mut record = StringRecord::new();
        loop {
            match self.reader.read_record(&mut record) {
                Ok(false) => break,
                Ok(true) => {
                    if record.iter().all(|v| v.trim().is_empty()) {
                        continue;
                    }
                    let line = Some(self.current_line());
                    if let Err(reason) = handle(&self.headers, &record) {
                        diagnostics.skip(self.kind, line, reason);
                    }
                }
                Err(err) if err.is_io_error() => {
                    return Err(LoadError::Csv {
                        table: self.kind,
                        source: err,
                    });
                }
                Err(err) => {
                    let line = Some(self.current_line());
                    diagnostics.skip(
                        self.kind,
                        line,
                        SkipReason::Unreadable {
                            message: err.to_string(),
                        },
                    );
                }
            }
        }
        Ok(())
    }
}
