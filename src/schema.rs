/// Column-name constants for brew-fermkit schema.
/// Single source of truth - exported to Python via PyO3.

// ── Reading columns ─────────────────────────────────────────────────────────
pub mod reading {
    pub const FV_ID: &str = "fv_id";
    pub const RECORDED_AT: &str = "recorded_at";
    pub const ENTRY_TYPE: &str = "entry_type";
    pub const STAGE: &str = "stage";
    pub const SOURCE: &str = "source";
    /// Input-order index appended at load time. Tie-break key when two rows
    /// for the same vessel share a timestamp.
    pub const ROW_INDEX: &str = "row_index";
}

// ── Measurement columns ─────────────────────────────────────────────────────
pub mod measures {
    pub const GRAVITY: &str = "gravity";
    pub const PH: &str = "ph";
    pub const TEMPERATURE: &str = "temperature";
    pub const VOLUME: &str = "volume";

    pub const ALL: [&str; 4] = [GRAVITY, PH, TEMPERATURE, VOLUME];
}

// ── Entry type values ───────────────────────────────────────────────────────
pub mod entry_type {
    pub const PACKAGING: &str = "Packaging Data";
}

// ── Derived columns ─────────────────────────────────────────────────────────
pub mod derived {
    pub const IS_PACKAGING: &str = "is_packaging";
}
