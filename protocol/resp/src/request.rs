//! Client-side request encoding.

/// A command to be sent to the server, encoded as a RESP array of bulk strings.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a, A: AsRef<[u8]>> {
    args: &'a [A],
}

impl<'a, A: AsRef<[u8]>> Request<'a, A> {
    /// Create a request from the command name followed by its arguments.
    pub fn new(args: &'a [A]) -> Self {
        Self { args }
    }

    /// Number of bytes [`encode`](Self::encode) will append.
    pub fn encoded_len(&self) -> usize {
        let mut len = 1 + decimal_len(self.args.len() as u64) + 2;
        for arg in self.args {
            let arg = arg.as_ref();
            len += 1 + decimal_len(arg.len() as u64) + 2 + arg.len() + 2;
        }
        len
    }

    /// Append the encoded request to `buf`. Returns the number of bytes written.
    ///
    /// Writes: `*<argc>\r\n` followed by `$<len>\r\n<arg>\r\n` per argument.
    pub fn encode(&self, buf: &mut Vec<u8>) -> usize {
        let start = buf.len();
        buf.reserve(self.encoded_len());
        buf.push(b'*');
        push_decimal(buf, self.args.len() as u64);
        buf.extend_from_slice(b"\r\n");
        for arg in self.args {
            let arg = arg.as_ref();
            buf.push(b'$');
            push_decimal(buf, arg.len() as u64);
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(arg);
            buf.extend_from_slice(b"\r\n");
        }
        buf.len() - start
    }
}

/// Write a u64 as decimal digits into a Vec.
fn push_decimal(buf: &mut Vec<u8>, n: u64) {
    if n == 0 {
        buf.push(b'0');
        return;
    }
    let start = buf.len();
    let mut val = n;
    while val > 0 {
        buf.push(b'0' + (val % 10) as u8);
        val /= 10;
    }
    buf[start..].reverse();
}

fn decimal_len(mut n: u64) -> usize {
    let mut len = 1;
    while n >= 10 {
        n /= 10;
        len += 1;
    }
    len
}
