//! Plot descriptors and a renderer that dumps their data as tables.
//!
//! A [`PlotSequence`] is a finite list of what to draw. Any
//! [`Plotter`] consumes it through [`render_sequence`] and decides how
//! and when the grid is laid out.

use crate::diagnostics::ReconstructionQc;
use crate::sites::NUM_MODALITIES;
use crate::traits::Plotter;

use log::info;
use matrix_util::common_io::{mkdir, write_lines};
use ndarray::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub enum PlotDescriptor {
    /// ELBO per cell from `start_epoch` onward
    History {
        title: Box<str>,
        start_epoch: usize,
        elbo: Vec<f32>,
    },
    /// Observed against expected counts, same shape
    Reconstruction {
        title: Box<str>,
        expected: Array2<f32>,
        observed: Array2<f32>,
    },
}

impl PlotDescriptor {
    pub fn title(&self) -> &str {
        match self {
            Self::History { title, .. } => title,
            Self::Reconstruction { title, .. } => title,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::History { .. } => "history",
            Self::Reconstruction { .. } => "reconstruction",
        }
    }
}

/// Plots to lay out in a grid of `ncols` columns
#[derive(Debug, Clone, PartialEq)]
pub struct PlotSequence {
    pub ncols: usize,
    pub plots: Vec<PlotDescriptor>,
}

impl PlotSequence {
    pub fn len(&self) -> usize {
        self.plots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plots.is_empty()
    }
}

/// Render every plot in order, then flush the grid once
pub fn render_sequence<P: Plotter + ?Sized>(seq: &PlotSequence, plotter: &mut P) -> anyhow::Result<()> {
    for (i, plot) in seq.plots.iter().enumerate() {
        plotter.render(i, plot)?;
    }
    plotter.flush(seq.ncols)
}

/// Training history at four zoom levels
///
/// Windows start at epochs `0`, `max_epochs/8`, `max_epochs/4` and
/// `max_epochs/2` (rounded); a window starting past the end of the
/// history is empty.
pub fn history_windows(history: &[f32], max_epochs: usize) -> PlotSequence {
    let starts = [
        0,
        (max_epochs as f32 / 8.0).round() as usize,
        (max_epochs as f32 / 4.0).round() as usize,
        (max_epochs as f32 / 2.0).round() as usize,
    ];

    let plots = starts
        .into_iter()
        .map(|start| PlotDescriptor::History {
            title: format!("ELBO from epoch {}", start).into_boxed_str(),
            start_epoch: start,
            elbo: history.iter().skip(start).copied().collect(),
        })
        .collect();

    PlotSequence { ncols: 4, plots }
}

/// Observed against expected counts, unspliced then spliced
pub fn reconstruction_plots(qc: &ReconstructionQc) -> PlotSequence {
    const NAMES: [&str; NUM_MODALITIES] = ["unspliced", "spliced"];

    let plots = NAMES
        .into_iter()
        .enumerate()
        .map(|(m, name)| PlotDescriptor::Reconstruction {
            title: format!("Reconstruction Accuracy ({})", name).into_boxed_str(),
            expected: qc.expected[m].clone(),
            observed: qc.observed[m].clone(),
        })
        .collect();

    PlotSequence { ncols: 3, plots }
}

/// Writes the data behind each plot to `{header}.plot{index}.tsv.gz`
/// and a manifest `{header}.plots.tsv` on flush
pub struct TsvPlotter {
    header: Box<str>,
    rendered: Vec<(usize, &'static str, Box<str>, Box<str>)>,
}

impl TsvPlotter {
    pub fn new(header: &str) -> Self {
        Self {
            header: header.into(),
            rendered: vec![],
        }
    }

    pub fn manifest_file(&self) -> String {
        format!("{}.plots.tsv", self.header)
    }

    pub fn plot_file(&self, index: usize) -> String {
        format!("{}.plot{}.tsv.gz", self.header, index)
    }
}

impl Plotter for TsvPlotter {
    fn render(&mut self, index: usize, plot: &PlotDescriptor) -> anyhow::Result<()> {
        let file = self.plot_file(index);
        mkdir(&file)?;

        let lines: Vec<Box<str>> = match plot {
            PlotDescriptor::History {
                start_epoch, elbo, ..
            } => std::iter::once("epoch\telbo".into())
                .chain(
                    elbo.iter()
                        .enumerate()
                        .map(|(i, x)| format!("{}\t{}", start_epoch + i + 1, x).into_boxed_str()),
                )
                .collect(),
            PlotDescriptor::Reconstruction {
                expected, observed, ..
            } => {
                if expected.dim() != observed.dim() {
                    anyhow::bail!(
                        "expected {:?} and observed {:?} differ in shape",
                        expected.dim(),
                        observed.dim()
                    );
                }
                std::iter::once("cell\tgene\texpected\tobserved".into())
                    .chain(expected.indexed_iter().map(|((i, j), x)| {
                        format!("{}\t{}\t{}\t{}", i, j, x, observed[(i, j)]).into_boxed_str()
                    }))
                    .collect()
            }
        };

        write_lines(&lines, &file)?;
        self.rendered
            .push((index, plot.kind(), plot.title().into(), file.into_boxed_str()));
        Ok(())
    }

    fn flush(&mut self, ncols: usize) -> anyhow::Result<()> {
        let ncols = ncols.max(1);
        let mut lines: Vec<Box<str>> = vec!["index\trow\tcol\tkind\ttitle\tfile".into()];
        for (index, kind, title, file) in self.rendered.drain(..) {
            lines.push(
                format!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    index,
                    index / ncols,
                    index % ncols,
                    kind,
                    title,
                    file
                )
                .into_boxed_str(),
            );
        }
        let manifest = self.manifest_file();
        mkdir(&manifest)?;
        write_lines(&lines, &manifest)?;
        info!("wrote {} plot(s) to {}", lines.len() - 1, manifest);
        Ok(())
    }
}
