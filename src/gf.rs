//! GF(256) arithmetic kernel.
//!
//! Field elements are bytes under the primitive polynomial
//! `x^8 + x^4 + x^3 + x^2 + 1` (0x11D) with generator 2. Addition is XOR.
//!
//! All tables are computed at compile time into one immutable static:
//! log/exp (the exp table is doubled so lookups never reduce mod 255), the
//! full 64 KiB multiplication and division tables, and the per-coefficient
//! split-nibble shuffle tables that feed the SIMD bulk operations.
//!
//! The bulk operations [`mul_mem`], [`mul_add_mem`] and [`add_mem`] are the
//! inner loop of every encode and decode. On x86-64 the multiply paths run
//! a byte-shuffle kernel over 64 bytes per iteration (two 256-bit vectors
//! under AVX2, four 128-bit vectors under SSSE3) with a scalar table-lookup
//! tail that is byte-exact with the vector body. `benches/coding.rs`
//! measures `mul_add_mem` at the 4 KiB block size; the AVX2 path clears the
//! 1 GB/s-per-core floor that rules out a plain 256x256 scalar table walk.
//!
//! Everything here is read-only after table construction and safe to call
//! from any thread with non-overlapping buffers.

/// The multiplicative generator of the field.
pub const GENERATOR: u8 = 2;

/// Field order.
const ORDER: usize = 256;

struct Tables {
    /// `exp[i] = GENERATOR^i`, duplicated past 255 so that
    /// `exp[log[a] + log[b]]` needs no reduction.
    exp: [u8; 510],
    /// Inverse of `exp`; `log[0]` is an unused sentinel.
    log: [u8; ORDER],
    /// `mul[a << 8 | b] = a * b`. Row 0 and column 0 are all zeros.
    mul: [u8; ORDER * ORDER],
    /// `div[a << 8 | b] = a / b` for `b != 0`; `b = 0` entries are unused.
    div: [u8; ORDER * ORDER],
    /// `shuffle_lo[c][x] = c * x` for the low nibble `x`.
    shuffle_lo: [[u8; 16]; ORDER],
    /// `shuffle_hi[c][x] = c * (x << 4)` for the high nibble `x`.
    shuffle_hi: [[u8; 16]; ORDER],
}

const fn build_tables() -> Tables {
    let mut exp = [0u8; 510];
    let mut log = [0u8; ORDER];

    let mut x: usize = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x as u8;
        log[x] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= 0x11d;
        }
        i += 1;
    }
    while i < 510 {
        exp[i] = exp[i - 255];
        i += 1;
    }

    let mut mul = [0u8; ORDER * ORDER];
    let mut div = [0u8; ORDER * ORDER];
    let mut a = 1;
    while a < ORDER {
        let mut b = 1;
        while b < ORDER {
            mul[(a << 8) | b] = exp[log[a] as usize + log[b] as usize];
            div[(a << 8) | b] = exp[log[a] as usize + 255 - log[b] as usize];
            b += 1;
        }
        a += 1;
    }

    let mut shuffle_lo = [[0u8; 16]; ORDER];
    let mut shuffle_hi = [[0u8; 16]; ORDER];
    let mut c = 0;
    while c < ORDER {
        let mut n = 0;
        while n < 16 {
            shuffle_lo[c][n] = mul[(c << 8) | n];
            shuffle_hi[c][n] = mul[(c << 8) | (n << 4)];
            n += 1;
        }
        c += 1;
    }

    Tables {
        exp,
        log,
        mul,
        div,
        shuffle_lo,
        shuffle_hi,
    }
}

static TABLES: Tables = build_tables();

/// Multiply two field elements.
#[inline(always)]
pub fn mul(a: u8, b: u8) -> u8 {
    TABLES.mul[((a as usize) << 8) | b as usize]
}

/// Divide `a` by `b`.
///
/// Division by zero is a contract violation; the table entry is an unused
/// zero and debug builds assert.
#[inline(always)]
pub fn div(a: u8, b: u8) -> u8 {
    debug_assert!(b != 0, "division by zero in GF(256)");
    TABLES.div[((a as usize) << 8) | b as usize]
}

/// Raise `a` to the `n`-th power.
#[inline]
pub fn pow(a: u8, n: usize) -> u8 {
    if a == 0 {
        return if n == 0 { 1 } else { 0 };
    }
    TABLES.exp[(TABLES.log[a as usize] as usize * n) % 255]
}

/// `dst[i] = c * src[i]`.
///
/// Buffers must be the same length. The coefficient short-circuits: zero
/// clears, one copies.
pub fn mul_mem(dst: &mut [u8], src: &[u8], c: u8) {
    debug_assert_eq!(dst.len(), src.len());

    if c == 0 {
        dst.fill(0);
        return;
    }
    if c == 1 {
        dst.copy_from_slice(src);
        return;
    }

    #[cfg(all(feature = "simd", target_arch = "x86_64"))]
    {
        if std::arch::is_x86_feature_detected!("avx2") {
            unsafe { simd::mul_mem_avx2(dst, src, c) };
            return;
        }
        if std::arch::is_x86_feature_detected!("ssse3") {
            unsafe { simd::mul_mem_ssse3(dst, src, c) };
            return;
        }
    }

    mul_mem_scalar(dst, src, c);
}

/// `dst[i] ^= c * src[i]`.
pub fn mul_add_mem(dst: &mut [u8], src: &[u8], c: u8) {
    debug_assert_eq!(dst.len(), src.len());

    if c == 0 {
        return;
    }
    if c == 1 {
        add_mem(dst, src);
        return;
    }

    #[cfg(all(feature = "simd", target_arch = "x86_64"))]
    {
        if std::arch::is_x86_feature_detected!("avx2") {
            unsafe { simd::mul_add_mem_avx2(dst, src, c) };
            return;
        }
        if std::arch::is_x86_feature_detected!("ssse3") {
            unsafe { simd::mul_add_mem_ssse3(dst, src, c) };
            return;
        }
    }

    mul_add_mem_scalar(dst, src, c);
}

/// `dst[i] ^= src[i]`, eight bytes at a time with a byte tail.
pub fn add_mem(dst: &mut [u8], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());

    let mut dst_words = dst.chunks_exact_mut(8);
    let mut src_words = src.chunks_exact(8);
    for (d, s) in dst_words.by_ref().zip(src_words.by_ref()) {
        let x = u64::from_ne_bytes(d[..8].try_into().unwrap())
            ^ u64::from_ne_bytes(s[..8].try_into().unwrap());
        d.copy_from_slice(&x.to_ne_bytes());
    }
    for (d, s) in dst_words
        .into_remainder()
        .iter_mut()
        .zip(src_words.remainder())
    {
        *d ^= s;
    }
}

fn mul_mem_scalar(dst: &mut [u8], src: &[u8], c: u8) {
    let row = &TABLES.mul[(c as usize) << 8..][..ORDER];
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = row[s as usize];
    }
}

fn mul_add_mem_scalar(dst: &mut [u8], src: &[u8], c: u8) {
    let row = &TABLES.mul[(c as usize) << 8..][..ORDER];
    for (d, &s) in dst.iter_mut().zip(src) {
        *d ^= row[s as usize];
    }
}

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
mod simd {
    use super::{ORDER, TABLES};
    use std::arch::x86_64::*;

    /// Multiply 32 bytes by the coefficient whose split-nibble tables are
    /// broadcast in `table_lo`/`table_hi`.
    #[inline(always)]
    unsafe fn mul_32(data: __m256i, table_lo: __m256i, table_hi: __m256i, mask: __m256i) -> __m256i {
        let lo = _mm256_and_si256(data, mask);
        let lo_prod = _mm256_shuffle_epi8(table_lo, lo);
        let hi = _mm256_and_si256(_mm256_srli_epi64(data, 4), mask);
        let hi_prod = _mm256_shuffle_epi8(table_hi, hi);
        _mm256_xor_si256(lo_prod, hi_prod)
    }

    /// Multiply 16 bytes, SSSE3 flavor.
    #[inline(always)]
    unsafe fn mul_16(data: __m128i, table_lo: __m128i, table_hi: __m128i, mask: __m128i) -> __m128i {
        let lo = _mm_and_si128(data, mask);
        let lo_prod = _mm_shuffle_epi8(table_lo, lo);
        let hi = _mm_and_si128(_mm_srli_epi64(data, 4), mask);
        let hi_prod = _mm_shuffle_epi8(table_hi, hi);
        _mm_xor_si128(lo_prod, hi_prod)
    }

    #[inline(always)]
    unsafe fn scalar_tail(dst: &mut [u8], src: &[u8], c: u8, from: usize) {
        let row = &TABLES.mul[(c as usize) << 8..][..ORDER];
        for i in from..dst.len() {
            dst[i] = row[src[i] as usize];
        }
    }

    #[inline(always)]
    unsafe fn scalar_tail_xor(dst: &mut [u8], src: &[u8], c: u8, from: usize) {
        let row = &TABLES.mul[(c as usize) << 8..][..ORDER];
        for i in from..dst.len() {
            dst[i] ^= row[src[i] as usize];
        }
    }

    #[target_feature(enable = "avx2")]
    pub unsafe fn mul_mem_avx2(dst: &mut [u8], src: &[u8], c: u8) {
        let table_lo = _mm256_broadcastsi128_si256(_mm_loadu_si128(
            TABLES.shuffle_lo[c as usize].as_ptr() as *const __m128i,
        ));
        let table_hi = _mm256_broadcastsi128_si256(_mm_loadu_si128(
            TABLES.shuffle_hi[c as usize].as_ptr() as *const __m128i,
        ));
        let mask = _mm256_set1_epi8(0x0f);

        let len = dst.len();
        let mut i = 0;
        while i + 64 <= len {
            let s0 = _mm256_loadu_si256(src.as_ptr().add(i) as *const __m256i);
            let s1 = _mm256_loadu_si256(src.as_ptr().add(i + 32) as *const __m256i);
            let r0 = mul_32(s0, table_lo, table_hi, mask);
            let r1 = mul_32(s1, table_lo, table_hi, mask);
            _mm256_storeu_si256(dst.as_mut_ptr().add(i) as *mut __m256i, r0);
            _mm256_storeu_si256(dst.as_mut_ptr().add(i + 32) as *mut __m256i, r1);
            i += 64;
        }

        scalar_tail(dst, src, c, i);
    }

    #[target_feature(enable = "avx2")]
    pub unsafe fn mul_add_mem_avx2(dst: &mut [u8], src: &[u8], c: u8) {
        let table_lo = _mm256_broadcastsi128_si256(_mm_loadu_si128(
            TABLES.shuffle_lo[c as usize].as_ptr() as *const __m128i,
        ));
        let table_hi = _mm256_broadcastsi128_si256(_mm_loadu_si128(
            TABLES.shuffle_hi[c as usize].as_ptr() as *const __m128i,
        ));
        let mask = _mm256_set1_epi8(0x0f);

        let len = dst.len();
        let mut i = 0;
        while i + 64 <= len {
            let s0 = _mm256_loadu_si256(src.as_ptr().add(i) as *const __m256i);
            let s1 = _mm256_loadu_si256(src.as_ptr().add(i + 32) as *const __m256i);
            let p0 = mul_32(s0, table_lo, table_hi, mask);
            let p1 = mul_32(s1, table_lo, table_hi, mask);
            let d0 = _mm256_loadu_si256(dst.as_ptr().add(i) as *const __m256i);
            let d1 = _mm256_loadu_si256(dst.as_ptr().add(i + 32) as *const __m256i);
            _mm256_storeu_si256(
                dst.as_mut_ptr().add(i) as *mut __m256i,
                _mm256_xor_si256(d0, p0),
            );
            _mm256_storeu_si256(
                dst.as_mut_ptr().add(i + 32) as *mut __m256i,
                _mm256_xor_si256(d1, p1),
            );
            i += 64;
        }

        scalar_tail_xor(dst, src, c, i);
    }

    #[target_feature(enable = "ssse3")]
    pub unsafe fn mul_mem_ssse3(dst: &mut [u8], src: &[u8], c: u8) {
        let table_lo = _mm_loadu_si128(TABLES.shuffle_lo[c as usize].as_ptr() as *const __m128i);
        let table_hi = _mm_loadu_si128(TABLES.shuffle_hi[c as usize].as_ptr() as *const __m128i);
        let mask = _mm_set1_epi8(0x0f);

        let len = dst.len();
        let mut i = 0;
        while i + 64 <= len {
            let r0 = mul_16(
                _mm_loadu_si128(src.as_ptr().add(i) as *const __m128i),
                table_lo,
                table_hi,
                mask,
            );
            let r1 = mul_16(
                _mm_loadu_si128(src.as_ptr().add(i + 16) as *const __m128i),
                table_lo,
                table_hi,
                mask,
            );
            let r2 = mul_16(
                _mm_loadu_si128(src.as_ptr().add(i + 32) as *const __m128i),
                table_lo,
                table_hi,
                mask,
            );
            let r3 = mul_16(
                _mm_loadu_si128(src.as_ptr().add(i + 48) as *const __m128i),
                table_lo,
                table_hi,
                mask,
            );
            _mm_storeu_si128(dst.as_mut_ptr().add(i) as *mut __m128i, r0);
            _mm_storeu_si128(dst.as_mut_ptr().add(i + 16) as *mut __m128i, r1);
            _mm_storeu_si128(dst.as_mut_ptr().add(i + 32) as *mut __m128i, r2);
            _mm_storeu_si128(dst.as_mut_ptr().add(i + 48) as *mut __m128i, r3);
            i += 64;
        }

        scalar_tail(dst, src, c, i);
    }

    #[target_feature(enable = "ssse3")]
    pub unsafe fn mul_add_mem_ssse3(dst: &mut [u8], src: &[u8], c: u8) {
        let table_lo = _mm_loadu_si128(TABLES.shuffle_lo[c as usize].as_ptr() as *const __m128i);
        let table_hi = _mm_loadu_si128(TABLES.shuffle_hi[c as usize].as_ptr() as *const __m128i);
        let mask = _mm_set1_epi8(0x0f);

        let len = dst.len();
        let mut i = 0;
        while i + 64 <= len {
            let mut off = i;
            while off < i + 64 {
                let p = mul_16(
                    _mm_loadu_si128(src.as_ptr().add(off) as *const __m128i),
                    table_lo,
                    table_hi,
                    mask,
                );
                let d = _mm_loadu_si128(dst.as_ptr().add(off) as *const __m128i);
                _mm_storeu_si128(dst.as_mut_ptr().add(off) as *mut __m128i, _mm_xor_si128(d, p));
                off += 16;
            }
            i += 64;
        }

        scalar_tail_xor(dst, src, c, i);
    }
}
