/// ASPRS classification code for ground returns.
pub const GROUND_CLASSIFICATION: u8 = 2;

/// ASPRS classification code for low noise, ignored by ground filtering.
pub const NOISE_CLASSIFICATION: u8 = 7;

/// Return number kept for first-return surface models.
pub const FIRST_RETURN: u8 = 1;
