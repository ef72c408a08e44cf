//! Resource name hashing.
//!
//! Every resource is keyed by the 32-bit `hashlittle` hash (Bob Jenkins'
//! lookup3, seed 0) of its canonical path. The same hash is applied to file
//! extensions to key format handlers.

/// A 32-bit hash of a canonical resource name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameHash(pub u32);

impl NameHash {
    /// Hash a resource name.
    #[inline]
    pub fn from_name(name: &str) -> Self {
        Self(hash_str(name))
    }

    /// Get the raw hash value.
    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for NameHash {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for NameHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Hash a string with seed 0.
#[inline]
pub fn hash_str(s: &str) -> u32 {
    hash_bytes(s.as_bytes(), 0)
}

/// Hash a declared extension such as `"ee"` or `".ee"`.
pub fn extension_hash(ext: &str) -> u32 {
    hash_str(ext.trim_start_matches('.'))
}

/// Hash the extension of a file name. Names without one hash the empty string.
pub fn file_extension_hash(name: &str) -> u32 {
    extension_hash(extension(name))
}

/// Return the extension of the last component of `name` without the dot,
/// or `""` if it has none.
pub fn extension(name: &str) -> &str {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    match file_name.rfind('.') {
        Some(index) => &file_name[index + 1..],
        None => "",
    }
}

/// `hashlittle` from lookup3, reading the key as little-endian words.
pub fn hash_bytes(key: &[u8], seed: u32) -> u32 {
    let mut a = 0xdead_beef_u32
        .wrapping_add(key.len() as u32)
        .wrapping_add(seed);
    let mut b = a;
    let mut c = a;

    if key.is_empty() {
        return c;
    }

    let mut rest = key;
    while rest.len() > 12 {
        a = a.wrapping_add(word(&rest[0..4]));
        b = b.wrapping_add(word(&rest[4..8]));
        c = c.wrapping_add(word(&rest[8..12]));
        mix(&mut a, &mut b, &mut c);
        rest = &rest[12..];
    }

    // Missing high bytes of the last block read as zero.
    let mut tail = [0u8; 12];
    tail[..rest.len()].copy_from_slice(rest);
    a = a.wrapping_add(word(&tail[0..4]));
    b = b.wrapping_add(word(&tail[4..8]));
    c = c.wrapping_add(word(&tail[8..12]));

    finalize(&mut a, &mut b, &mut c);
    c
}

#[inline]
fn word(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline]
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(4);
    *c = c.wrapping_add(*b);

    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(6);
    *a = a.wrapping_add(*c);

    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(8);
    *b = b.wrapping_add(*a);

    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(16);
    *c = c.wrapping_add(*b);

    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(19);
    *a = a.wrapping_add(*c);

    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(4);
    *b = b.wrapping_add(*a);
}

#[inline]
fn finalize(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(14));

    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(11));

    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(25));

    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(16));

    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(4));

    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(14));

    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(24));
}
