/// A token associated with a registered I/O source.
///
/// The endpoint uses `Token(usize)` as the index into the poller's
/// `Slab<ConnectionWrapper>`, so round-tripping a token back to its wrapper
/// is an O(1) slab lookup rather than a hash lookup.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Token(pub usize);

impl From<Token> for usize {
    fn from(token: Token) -> usize {
        token.0
    }
}

impl From<Token> for u64 {
    fn from(token: Token) -> u64 {
        token.0 as u64
    }
}

impl From<usize> for Token {
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<u64> for Token {
    fn from(val: u64) -> Token {
        Token(val as usize)
    }
}
