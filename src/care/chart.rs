//! 日汇总柱状图
//!
//! ChartRenderer 把一天的事件渲染为图片字节；SvgBarChart 画三根柱：喂奶总量 (ml)、小睡总时长 (分钟)、换尿布次数。

use thiserror::Error;

use crate::care::{compute_day_stats, CareEvent};

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("nothing to render")]
    Empty,
    #[error("chart rendering failed: {0}")]
    Render(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartImage {
    pub mime_type: String,
    pub file_extension: String,
    pub bytes: Vec<u8>,
}

pub trait ChartRenderer: Send + Sync {
    fn render(&self, events: &[CareEvent]) -> Result<ChartImage, ChartError>;
}

#[derive(Debug, Clone)]
pub struct SvgBarChart {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for SvgBarChart {
    fn default() -> Self {
        Self {
            width: 480,
            height: 320,
            title: "Today's care summary".to_string(),
        }
    }
}

const MARGIN: u32 = 40;
const BAR_COLORS: [&str; 3] = ["#4e79a7", "#f28e2b", "#59a14f"];

impl ChartRenderer for SvgBarChart {
    fn render(&self, events: &[CareEvent]) -> Result<ChartImage, ChartError> {
        if events.is_empty() {
            return Err(ChartError::Empty);
        }
        if self.width <= MARGIN * 2 || self.height <= MARGIN * 2 {
            return Err(ChartError::Render(format!(
                "canvas {}x{} is too small",
                self.width, self.height
            )));
        }
        let stats = compute_day_stats(events);
        let bars = [
            ("Feeds (ml)", stats.feeds.total_volume_ml),
            ("Naps (min)", stats.naps.total_minutes),
            ("Diapers", stats.diapers.count),
        ];
        let max = bars.iter().map(|(_, v)| *v).max().unwrap_or(0).max(1);

        let plot_w = self.width - MARGIN * 2;
        let plot_h = self.height - MARGIN * 2;
        let slot = plot_w / bars.len() as u32;
        let bar_w = slot * 3 / 5;

        let mut svg = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">\n\
             <rect width=\"100%\" height=\"100%\" fill=\"white\"/>\n\
             <text x=\"{cx}\" y=\"24\" text-anchor=\"middle\" font-family=\"sans-serif\" font-size=\"16\">{title}</text>\n",
            w = self.width,
            h = self.height,
            cx = self.width / 2,
            title = escape(&self.title),
        );
        let baseline = MARGIN + plot_h;
        for (i, (label, value)) in bars.iter().enumerate() {
            let bar_h = (u64::from(*value) * u64::from(plot_h) / u64::from(max)) as u32;
            let x = MARGIN + slot * i as u32 + (slot - bar_w) / 2;
            let y = baseline - bar_h;
            let color = BAR_COLORS[i % BAR_COLORS.len()];
            svg.push_str(&format!(
                "<rect x=\"{x}\" y=\"{y}\" width=\"{bar_w}\" height=\"{bar_h}\" fill=\"{color}\"/>\n\
                 <text x=\"{tx}\" y=\"{vy}\" text-anchor=\"middle\" font-family=\"sans-serif\" font-size=\"12\">{value}</text>\n\
                 <text x=\"{tx}\" y=\"{ly}\" text-anchor=\"middle\" font-family=\"sans-serif\" font-size=\"12\">{label}</text>\n",
                tx = x + bar_w / 2,
                vy = y.saturating_sub(4),
                ly = baseline + 16,
                label = escape(label),
            ));
        }
        svg.push_str(&format!(
            "<line x1=\"{MARGIN}\" y1=\"{baseline}\" x2=\"{x2}\" y2=\"{baseline}\" stroke=\"black\"/>\n</svg>\n",
            x2 = MARGIN + plot_w,
        ));

        Ok(ChartImage {
            mime_type: "image/svg+xml".to_string(),
            file_extension: "svg".to_string(),
            bytes: svg.into_bytes(),
        })
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::EventType;

    #[test]
    fn test_renders_three_bars_with_totals() {
        let events = vec![
            CareEvent {
                event_type: EventType::Feed,
                timestamp: "2025-11-19T07:10:00".to_string(),
                volume_ml: Some(90),
                duration_minutes: None,
                notes: None,
            },
            CareEvent {
                event_type: EventType::Nap,
                timestamp: "2025-11-19T09:00:00".to_string(),
                volume_ml: None,
                duration_minutes: Some(30),
                notes: None,
            },
        ];
        let image = SvgBarChart::default().render(&events).unwrap();
        assert_eq!(image.mime_type, "image/svg+xml");
        let svg = String::from_utf8(image.bytes).unwrap();
        assert_eq!(svg.matches("<rect x=").count(), 3);
        assert!(svg.contains(">90<"));
        assert!(svg.contains(">30<"));
        assert!(svg.contains("Feeds (ml)"));
    }

    #[test]
    fn test_empty_input_is_rejected() {
        assert!(matches!(SvgBarChart::default().render(&[]), Err(ChartError::Empty)));
    }
}
