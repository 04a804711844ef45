//! Token writer for outgoing `ra_svn` data.
//!
//! Every token is followed by one space; lists open with `( ` and close with
//! `) `. Optional values travel as zero- or one-element tuples.

pub(crate) struct WireEncoder<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> WireEncoder<'a> {
    pub(crate) fn new(out: &'a mut Vec<u8>) -> Self {
        Self { out }
    }

    /// Writes `( name ( params ) ) ` followed by a newline.
    pub(crate) fn command(&mut self, name: &str, params: impl FnOnce(&mut Self)) {
        self.list_start();
        self.word(name);
        self.list_start();
        params(self);
        self.list_end();
        self.list_end();
        self.out.push(b'\n');
    }

    pub(crate) fn word(&mut self, word: &str) {
        self.out.extend_from_slice(word.as_bytes());
        self.out.push(b' ');
    }

    pub(crate) fn number(&mut self, n: u64) {
        push_decimal(n, self.out);
        self.out.push(b' ');
    }

    pub(crate) fn string_bytes(&mut self, bytes: &[u8]) {
        push_decimal(bytes.len() as u64, self.out);
        self.out.push(b':');
        self.out.extend_from_slice(bytes);
        self.out.push(b' ');
    }

    pub(crate) fn string_str(&mut self, s: &str) {
        self.string_bytes(s.as_bytes());
    }

    pub(crate) fn list_start(&mut self) {
        self.out.extend_from_slice(b"( ");
    }

    pub(crate) fn list_end(&mut self) {
        self.out.extend_from_slice(b") ");
    }

    /// `( n )` or `( )`.
    pub(crate) fn tuple_number(&mut self, n: Option<u64>) {
        self.list_start();
        if let Some(n) = n {
            self.number(n);
        }
        self.list_end();
    }

    /// `( string )` or `( )`.
    pub(crate) fn tuple_bytes(&mut self, bytes: Option<&[u8]>) {
        self.list_start();
        if let Some(bytes) = bytes {
            self.string_bytes(bytes);
        }
        self.list_end();
    }

    /// `( path rev )` or `( )`.
    pub(crate) fn copy_source(&mut self, copy_from: Option<&(String, u64)>) {
        self.list_start();
        if let Some((path, rev)) = copy_from {
            self.string_str(path);
            self.number(*rev);
        }
        self.list_end();
    }
}

fn push_decimal(n: u64, out: &mut Vec<u8>) {
    let mut digits = [0u8; 20];
    let mut start = digits.len();
    let mut rest = n;
    loop {
        start -= 1;
        digits[start] = b'0' + (rest % 10) as u8;
        rest /= 10;
        if rest == 0 {
            break;
        }
    }
    out.extend_from_slice(&digits[start..]);
}
