//! Panel heights and column widths, derived from the terminal size at every
//! draw.

/// CPU and memory rows of the overview panel.
pub const OVERVIEW_FIXED_ROWS: u16 = 2;
/// Borders of a panel.
pub const PANEL_BORDERS: u16 = 2;
/// Borders plus the header row of the process table.
pub const TABLE_OVERHEAD: u16 = 3;
pub const FOOTER_ROWS: u16 = 1;
pub const MIN_PROCESS_ROWS: u16 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelHeights {
    pub overview: u16,
    /// Zero when no GPU panel is shown.
    pub gpu: u16,
    pub process_table: u16,
    /// Process rows that fit in the table.
    pub process_rows: u16,
}

/// Splits `height` rows among the panels.
///
/// The overview holds 2 fixed rows plus a disk I/O row when available. The
/// GPU panel holds one row per device plus a header. The process table gets
/// what remains, but never fewer than `MIN_PROCESS_ROWS` rows.
pub fn panel_heights(height: u16, gpu_devices: u16, has_disk_io: bool) -> PanelHeights {
    let overview = OVERVIEW_FIXED_ROWS + u16::from(has_disk_io) + PANEL_BORDERS;
    let gpu = if gpu_devices > 0 {
        gpu_devices.saturating_add(TABLE_OVERHEAD)
    } else {
        0
    };
    let remaining = height.saturating_sub(overview + gpu + FOOTER_ROWS);
    let process_rows = remaining
        .saturating_sub(TABLE_OVERHEAD)
        .max(MIN_PROCESS_ROWS);
    PanelHeights {
        overview,
        gpu,
        process_table: process_rows + TABLE_OVERHEAD,
        process_rows,
    }
}

pub struct ColumnSpec {
    pub title: &'static str,
    /// Share of the terminal width, in percent.
    pub percent: u16,
    pub min_width: u16,
}

pub const PROCESS_COLUMNS: [ColumnSpec; 6] = [
    ColumnSpec { title: "PID", percent: 10, min_width: 7 },
    ColumnSpec { title: "Name", percent: 40, min_width: 12 },
    ColumnSpec { title: "CPU %", percent: 12, min_width: 7 },
    ColumnSpec { title: "Mem %", percent: 12, min_width: 7 },
    ColumnSpec { title: "Read", percent: 13, min_width: 9 },
    ColumnSpec { title: "Write", percent: 13, min_width: 9 },
];

/// Widths of the process table columns for a terminal `width` columns wide.
pub fn column_widths(width: u16) -> [u16; 6] {
    let usable = u32::from(width.saturating_sub(PANEL_BORDERS));
    PROCESS_COLUMNS.map(|column| {
        let share = usable * u32::from(column.percent) / 100;
        u16::try_from(share).unwrap_or(u16::MAX).max(column.min_width)
    })
}
