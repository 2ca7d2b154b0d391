//! Floating-point register ops (`FAD`, `FSB`, `FML`, `FDV`) and the
//! restoring-division auxiliary routine used by signed `DIV` when the
//! divisor isn't a positive 32-bit value.
//!
//! Native `f32` bit-reinterpretation stands in for a dedicated software
//! float unit; see `DESIGN.md` for the reasoning.

/// `FAD`/`FSB`: `u` selects truncating instead of round-to-nearest when the
/// result needs rounding; `v` is reserved per the ISA and ignored here.
pub fn fadd(a: u32, b: u32, u: bool, sub: bool) -> u32 {
    let x = f32::from_bits(a);
    let y = f32::from_bits(b);
    let y = if sub { -y } else { y };
    let r = x + y;
    let r = if u { f32::trunc(r) } else { r };
    r.to_bits()
}

pub fn fmul(a: u32, b: u32) -> u32 {
    (f32::from_bits(a) * f32::from_bits(b)).to_bits()
}

pub fn fdiv(a: u32, b: u32) -> u32 {
    (f32::from_bits(a) / f32::from_bits(b)).to_bits()
}

/// Restoring binary long division of a 32-bit dividend by a 32-bit
/// divisor, returning `(quotient, remainder)`. `unsigned` selects
/// unsigned vs. two's-complement signed semantics. This is the auxiliary
/// routine `DIV` falls back to whenever the fast path (`divisor > 0` in
/// signed mode) doesn't apply, including division by zero, which
/// terminates deterministically rather than trapping.
pub fn idiv(dividend: i32, divisor: i32, unsigned: bool) -> (u32, u32) {
    if unsigned {
        let dividend = dividend as u32;
        let divisor = divisor as u32;
        if divisor == 0 {
            return (u32::MAX, dividend);
        }
        return (dividend / divisor, dividend % divisor);
    }

    let neg_divisor = divisor < 0;
    let neg_dividend = dividend < 0;
    let dividend_mag = (dividend as i64).unsigned_abs() as u32;
    let divisor_mag = (divisor as i64).unsigned_abs() as u32;

    if divisor_mag == 0 {
        return (u32::MAX, dividend_mag);
    }

    let (mut quotient, mut remainder) = (0u32, 0u32);
    for i in (0..32).rev() {
        remainder = (remainder << 1) | ((dividend_mag >> i) & 1);
        if remainder >= divisor_mag {
            remainder -= divisor_mag;
            quotient |= 1 << i;
        }
    }

    if neg_dividend != neg_divisor {
        quotient = quotient.wrapping_neg();
    }
    if neg_dividend {
        remainder = remainder.wrapping_neg();
    }
    (quotient, remainder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fadd_matches_native_float() {
        let a = 1.5f32.to_bits();
        let b = 2.25f32.to_bits();
        let r = f32::from_bits(fadd(a, b, false, false));
        assert_eq!(r, 3.75);
    }

    #[test]
    fn fsub_negates_second_operand() {
        let a = 5.0f32.to_bits();
        let b = 2.0f32.to_bits();
        let r = f32::from_bits(fadd(a, b, false, true));
        assert_eq!(r, 3.0);
    }

    #[test]
    fn idiv_unsigned_basic() {
        let (q, r) = idiv(10, 3, true);
        assert_eq!((q, r), (3, 1));
    }

    #[test]
    fn idiv_signed_negative_dividend() {
        let (q, r) = idiv(-7, 2, false);
        assert_eq!(q as i32, -3);
        assert_eq!(r as i32, -1);
    }

    #[test]
    fn idiv_by_zero_is_deterministic() {
        let (q, r) = idiv(42, 0, true);
        assert_eq!(q, u32::MAX);
        assert_eq!(r, 42);
    }
}
