//! Quaternion and Tait-Bryan angle conversions
//!
//! Angle convention: intrinsic X-Y'-Z'' rotations, so `pitch` is about X,
//! `roll` about Y and `yaw` about Z. This matches the frame the DMP
//! quaternion is reported in when the mounting orientation is applied.

/// Unit-norm orientation quaternion (scalar first)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    /// Scalar component
    pub w: f64,
    /// X vector component
    pub x: f64,
    /// Y vector component
    pub y: f64,
    /// Z vector component
    pub z: f64,
}

/// Tait-Bryan angles in radians
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TaitBryan {
    /// Rotation about X
    pub pitch: f64,
    /// Rotation about Y
    pub roll: f64,
    /// Rotation about Z
    pub yaw: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quaternion {
    /// The identity rotation
    pub const IDENTITY: Self = Self {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Construct from raw components
    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// Euclidean norm
    pub fn magnitude(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Scale to unit norm; a zero quaternion is left unchanged
    pub fn normalize(&self) -> Self {
        let mag = self.magnitude();
        if mag == 0.0 {
            return *self;
        }
        Self {
            w: self.w / mag,
            x: self.x / mag,
            y: self.y / mag,
            z: self.z / mag,
        }
    }

    /// Conjugate (inverse rotation for unit quaternions)
    pub fn conjugate(&self) -> Self {
        Self {
            w: self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }

    /// Hamilton product `self * rhs`
    pub fn multiply(&self, rhs: &Self) -> Self {
        Self {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }

    /// Convert to Tait-Bryan angles
    pub fn to_tait_bryan(&self) -> TaitBryan {
        let (q0, q1, q2, q3) = (self.w, self.x, self.y, self.z);
        TaitBryan {
            pitch: (2.0 * (q2 * q3 + q0 * q1)).atan2(1.0 - 2.0 * (q1 * q1 + q2 * q2)),
            roll: (2.0 * (q0 * q2 - q1 * q3)).asin(),
            yaw: (2.0 * (q1 * q2 + q0 * q3)).atan2(1.0 - 2.0 * (q2 * q2 + q3 * q3)),
        }
    }

    /// Build a unit quaternion from Tait-Bryan angles
    pub fn from_tait_bryan(tb: TaitBryan) -> Self {
        let cx = (tb.pitch / 2.0).cos();
        let sx = (tb.pitch / 2.0).sin();
        let cy = (tb.roll / 2.0).cos();
        let sy = (tb.roll / 2.0).sin();
        let cz = (tb.yaw / 2.0).cos();
        let sz = (tb.yaw / 2.0).sin();
        Self {
            w: cx * cy * cz + sx * sy * sz,
            x: sx * cy * cz - cx * sy * sz,
            y: cx * sy * cz + sx * cy * sz,
            z: cx * cy * sz - sx * sy * cz,
        }
        .normalize()
    }

    /// Rotate a 3-vector by this quaternion
    pub fn rotate_vector(&self, v: [f64; 3]) -> [f64; 3] {
        let p = Self::new(0.0, v[0], v[1], v[2]);
        let rotated = self.multiply(&p.multiply(&self.conjugate()));
        [rotated.x, rotated.y, rotated.z]
    }
}
