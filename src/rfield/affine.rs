//! Exact rational index maps.
//!
//! A stage maps an output index `j` to a coordinate in its input frame.
//! Downsampling stages scale by the stride, upsampling stages divide by it,
//! so compositions along the chain are kept as `(num·x + shift) / den` with
//! integer parts and reduced by their gcd.

/// `x ↦ (num·x + shift) / den`, with `num > 0` and `den > 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Affine {
    pub num: i64,
    pub den: i64,
    pub shift: i64,
}

impl Affine {
    pub fn identity() -> Self {
        Self {
            num: 1,
            den: 1,
            shift: 0,
        }
    }

    pub fn new(num: i64, den: i64, shift: i64) -> Self {
        debug_assert!(num > 0 && den > 0);
        Self { num, den, shift }.reduced()
    }

    /// `self ∘ inner`: apply `inner` first, then `self`.
    pub fn after(&self, inner: &Affine) -> Affine {
        // (n1·((n2·x + s2)/d2) + s1)/d1 = (n1·n2·x + n1·s2 + s1·d2) / (d1·d2)
        Affine::new(
            self.num * inner.num,
            self.den * inner.den,
            self.num * inner.shift + self.shift * inner.den,
        )
    }

    /// Image of `x` if it is an integer.
    pub fn apply_exact(&self, x: i64) -> Option<i64> {
        let v = self.num * x + self.shift;
        if v.rem_euclid(self.den) == 0 {
            Some(v.div_euclid(self.den))
        } else {
            None
        }
    }

    fn reduced(self) -> Self {
        let g = gcd(gcd(self.num, self.den), self.shift.abs());
        if g <= 1 {
            return self;
        }
        Self {
            num: self.num / g,
            den: self.den / g,
            shift: self.shift / g,
        }
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs()
}
