//! Dashboard state and rendering, independent of the real terminal.

use super::cadence::RefreshCadence;
use super::layout::{column_widths, panel_heights, PanelHeights, FOOTER_ROWS, PROCESS_COLUMNS};
use crate::core::{GpuReading, ProcessSample, SystemOverview};
use crate::sampling::Sources;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Modifier, Style, Stylize};
use ratatui::text::Line;
use ratatui::widgets::{Block, Paragraph, Row, Table};
use ratatui::Frame;
use std::collections::HashSet;
use tracing::trace;

/// Orders processes by CPU usage, highest first. Ties keep their enumeration
/// order.
pub fn sort_by_cpu(samples: &mut [ProcessSample]) {
    samples.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| v.to_string())
}

pub struct Dashboard {
    sources: Sources,
    cadence: RefreshCadence,
    processes: Vec<ProcessSample>,
    overview: SystemOverview,
    gpus: Vec<GpuReading>,
}

impl Dashboard {
    pub fn new(sources: Sources, resort_every: u32) -> Self {
        Self {
            sources,
            cadence: RefreshCadence::new(resort_every),
            processes: Vec::new(),
            overview: SystemOverview::default(),
            gpus: Vec::new(),
        }
    }

    /// Panel heights for a terminal `height` rows tall.
    fn layout(&self, height: u16) -> PanelHeights {
        let gpu_devices =
            u16::try_from(self.sources.gpus.capability().device_count()).unwrap_or(u16::MAX);
        panel_heights(height, gpu_devices, self.overview.disk_io.is_some())
    }

    /// Refreshes the data for one draw tick on a terminal `height` rows tall
    /// and returns the layout the frame should be drawn with.
    ///
    /// On a re-sort tick the whole process list is re-sampled and sorted;
    /// otherwise only the visible processes are re-read. A process that
    /// vanished is dropped and forces a re-sort on the next tick.
    pub fn update(&mut self, height: u16) -> PanelHeights {
        self.overview = self.sources.processes.overview();
        if self.sources.gpus.capability().is_present() {
            self.gpus = self.sources.gpus.read_devices();
        }
        let heights = self.layout(height);
        self.refresh_processes(usize::from(heights.process_rows));
        self.cadence.record_draw();
        heights
    }

    fn refresh_processes(&mut self, visible_rows: usize) {
        if self.cadence.is_resort_due() {
            let mut processes = self.sources.processes.sample_processes();
            sort_by_cpu(&mut processes);
            self.processes = processes;
            self.cadence.record_resort();
            trace!(count = self.processes.len(), "Re-sorted process list");
            return;
        }

        let mut vanished = HashSet::new();
        for row in self.processes.iter_mut().take(visible_rows) {
            match self.sources.processes.refresh_process(row.pid) {
                Some(fresh) => *row = fresh,
                None => {
                    vanished.insert(row.pid);
                }
            }
        }
        if !vanished.is_empty() {
            self.processes.retain(|row| !vanished.contains(&row.pid));
            self.cadence.force();
        }
    }

    pub fn processes(&self) -> &[ProcessSample] {
        &self.processes
    }

    pub fn overview(&self) -> &SystemOverview {
        &self.overview
    }

    pub fn render(&self, frame: &mut Frame) {
        let area = frame.area();
        let heights = self.layout(area.height);
        let [overview_area, gpu_area, process_area, _, footer_area] = Layout::vertical([
            Constraint::Length(heights.overview),
            Constraint::Length(heights.gpu),
            Constraint::Length(heights.process_table),
            Constraint::Min(0),
            Constraint::Length(FOOTER_ROWS),
        ])
        .areas(area);

        self.render_overview(frame, overview_area);
        if heights.gpu > 0 {
            self.render_gpus(frame, gpu_area);
        }
        self.render_processes(frame, process_area, usize::from(heights.process_rows));
        frame.render_widget(
            Paragraph::new(Line::from("q / Esc / Ctrl-C to quit").dim()),
            footer_area,
        );
    }

    fn render_overview(&self, frame: &mut Frame, area: Rect) {
        let overview = &self.overview;
        let mut lines = vec![
            Line::from(format!("CPU     {:>6.1} %", overview.cpu_percent)),
            Line::from(format!(
                "Memory  {:>6.1} %  ({} / {})",
                overview.memory_percent(),
                format_bytes(overview.memory_used_bytes),
                format_bytes(overview.memory_total_bytes)
            )),
        ];
        if let Some(disk) = overview.disk_io {
            lines.push(Line::from(format!(
                "Disk    read {}  write {}",
                format_bytes(disk.read_bytes),
                format_bytes(disk.written_bytes)
            )));
        }
        frame.render_widget(
            Paragraph::new(lines).block(Block::bordered().title(" System ")),
            area,
        );
    }

    fn render_gpus(&self, frame: &mut Frame, area: Rect) {
        let header = Row::new(["GPU", "Name", "Util %", "Mem %", "Temp °C", "Fan %", "Power W"])
            .style(Style::default().add_modifier(Modifier::BOLD));
        let rows = self.gpus.iter().map(|gpu| {
            Row::new([
                gpu.index.to_string(),
                gpu.name.clone().unwrap_or_else(|| "N/A".to_string()),
                or_na(gpu.utilization_gpu),
                or_na(gpu.utilization_memory),
                or_na(gpu.temperature_c),
                or_na(gpu.fan_percent),
                gpu.power_watts
                    .map_or_else(|| "N/A".to_string(), |w| format!("{:.1}", w)),
            ])
        });
        let widths = [
            Constraint::Length(4),
            Constraint::Min(16),
            Constraint::Length(7),
            Constraint::Length(7),
            Constraint::Length(8),
            Constraint::Length(6),
            Constraint::Length(8),
        ];
        frame.render_widget(
            Table::new(rows, widths)
                .header(header)
                .block(Block::bordered().title(" GPUs ")),
            area,
        );
    }

    fn render_processes(&self, frame: &mut Frame, area: Rect, visible_rows: usize) {
        let header = Row::new(PROCESS_COLUMNS.iter().map(|column| column.title))
            .style(Style::default().add_modifier(Modifier::BOLD));
        let rows = self.processes.iter().take(visible_rows).map(|process| {
            Row::new([
                process.pid.to_string(),
                process.name.clone(),
                format!("{:.1}", process.cpu_percent),
                format!("{:.1}", process.memory_percent),
                or_na(process.io_read_bytes.map(format_bytes)),
                or_na(process.io_write_bytes.map(format_bytes)),
            ])
        });
        let widths = column_widths(area.width).map(Constraint::Length);
        frame.render_widget(
            Table::new(rows, widths)
                .header(header)
                .block(Block::bordered().title(" Processes (by CPU) ")),
            area,
        );
    }
}
