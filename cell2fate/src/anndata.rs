//! In-memory annotated data: a cells x genes container with named
//! layers, per-cell (`obs`) and per-gene (`var`) columns and
//! unstructured (`uns`) entries.
//!
//! Every setter replaces a whole slot. Nothing here is synchronised;
//! callers must not write to the same object from several threads.

use crate::error::{Cell2fateError, Result};
use crate::export::ExportRecord;

use matrix_util::common_io::write_lines;
use matrix_util::traits::{CountOps, IoOps, RowsToDense};
use nalgebra_sparse::CsrMatrix;
use ndarray::prelude::*;
use std::collections::{BTreeMap, HashSet};

/// A cells x genes matrix
#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Array2<f32>),
    Sparse(CsrMatrix<f32>),
}

impl Layer {
    pub fn shape(&self) -> (usize, usize) {
        (self.num_rows(), self.num_columns())
    }
}

impl RowsToDense for Layer {
    fn num_rows(&self) -> usize {
        match self {
            Layer::Dense(x) => x.nrows(),
            Layer::Sparse(x) => x.nrows(),
        }
    }

    fn num_columns(&self) -> usize {
        match self {
            Layer::Dense(x) => x.ncols(),
            Layer::Sparse(x) => x.ncols(),
        }
    }

    fn rows_to_dense(&self, rows: &[usize]) -> anyhow::Result<Array2<f32>> {
        match self {
            Layer::Dense(x) => x.rows_to_dense(rows),
            Layer::Sparse(x) => x.rows_to_dense(rows),
        }
    }
}

impl CountOps for Layer {
    fn find_non_count(&self) -> Option<(usize, usize, f32)> {
        match self {
            Layer::Dense(x) => x.find_non_count(),
            Layer::Sparse(x) => x.find_non_count(),
        }
    }
}

/// One per-cell or per-gene annotation column
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<f32>),
    Integer(Vec<i64>),
    Categorical(Vec<Box<str>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(x) => x.len(),
            Column::Integer(x) => x.len(),
            Column::Categorical(x) => x.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text of the `i`-th element
    pub fn value_str(&self, i: usize) -> Option<Box<str>> {
        match self {
            Column::Numeric(x) => x.get(i).map(|v| v.to_string().into_boxed_str()),
            Column::Integer(x) => x.get(i).map(|v| v.to_string().into_boxed_str()),
            Column::Categorical(x) => x.get(i).cloned(),
        }
    }

    pub fn as_numeric(&self) -> Option<&[f32]> {
        match self {
            Column::Numeric(x) => Some(x),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnsEntry {
    Record(Box<ExportRecord>),
    Array(ArrayD<f32>),
}

impl UnsEntry {
    pub fn as_record(&self) -> Option<&ExportRecord> {
        match self {
            UnsEntry::Record(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayD<f32>> {
        match self {
            UnsEntry::Array(x) => Some(x),
            _ => None,
        }
    }
}

/// Slot writes collected before any of them reaches an `AnnData`
#[derive(Debug, Default)]
pub struct SlotUpdate {
    layers: Vec<(Box<str>, Layer)>,
    obs: Vec<(Box<str>, Column)>,
    var: Vec<(Box<str>, Column)>,
    uns: Vec<(Box<str>, UnsEntry)>,
}

impl SlotUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(&mut self, name: &str, layer: Layer) {
        self.layers.push((name.into(), layer));
    }

    pub fn obs(&mut self, name: &str, column: Column) {
        self.obs.push((name.into(), column));
    }

    pub fn var(&mut self, name: &str, column: Column) {
        self.var.push((name.into(), column));
    }

    pub fn uns(&mut self, name: &str, entry: UnsEntry) {
        self.uns.push((name.into(), entry));
    }
}

#[derive(Debug, Clone)]
pub struct AnnData {
    obs_names: Vec<Box<str>>,
    var_names: Vec<Box<str>>,
    layers: BTreeMap<Box<str>, Layer>,
    obs: BTreeMap<Box<str>, Column>,
    var: BTreeMap<Box<str>, Column>,
    uns: BTreeMap<Box<str>, UnsEntry>,
}

fn check_names(names: &[Box<str>], what: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(names.len());
    for x in names {
        if x.is_empty() {
            return Err(Cell2fateError::InvalidArgument(format!(
                "empty {} name",
                what
            )));
        }
        if !seen.insert(x.as_ref()) {
            return Err(Cell2fateError::InvalidArgument(format!(
                "duplicate {} name: {}",
                what, x
            )));
        }
    }
    Ok(())
}

impl AnnData {
    /// An empty container over the given cells and genes
    /// * `obs_names` - unique cell names
    /// * `var_names` - unique gene names
    pub fn new(obs_names: Vec<Box<str>>, var_names: Vec<Box<str>>) -> Result<Self> {
        check_names(&obs_names, "obs")?;
        check_names(&var_names, "var")?;
        Ok(Self {
            obs_names,
            var_names,
            layers: BTreeMap::new(),
            obs: BTreeMap::new(),
            var: BTreeMap::new(),
            uns: BTreeMap::new(),
        })
    }

    /// Cells named `cell_0`, `cell_1`, ... and genes `gene_0`, ...
    pub fn with_default_names(n_obs: usize, n_vars: usize) -> Result<Self> {
        let obs = (0..n_obs).map(|i| format!("cell_{}", i).into_boxed_str());
        let var = (0..n_vars).map(|j| format!("gene_{}", j).into_boxed_str());
        Self::new(obs.collect(), var.collect())
    }

    pub fn n_obs(&self) -> usize {
        self.obs_names.len()
    }

    pub fn n_vars(&self) -> usize {
        self.var_names.len()
    }

    pub fn obs_names(&self) -> &[Box<str>] {
        &self.obs_names
    }

    pub fn var_names(&self) -> &[Box<str>] {
        &self.var_names
    }

    fn check_layer(&self, name: &str, layer: &Layer) -> Result<()> {
        let expected = (self.n_obs(), self.n_vars());
        let found = layer.shape();
        if found != expected {
            return Err(Cell2fateError::ShapeMismatch {
                site: format!("layer {}", name),
                expected: vec![expected.0, expected.1],
                found: vec![found.0, found.1],
            });
        }
        Ok(())
    }

    pub fn set_layer(&mut self, name: &str, layer: Layer) -> Result<()> {
        self.check_layer(name, &layer)?;
        self.layers.insert(name.into(), layer);
        Ok(())
    }

    /// Write every staged slot, or nothing if any of them has the
    /// wrong shape
    pub fn apply(&mut self, update: SlotUpdate) -> Result<()> {
        for (name, layer) in update.layers.iter() {
            self.check_layer(name, layer)?;
        }
        for (name, column) in update.obs.iter() {
            check_column_len(name, column, self.n_obs())?;
        }
        for (name, column) in update.var.iter() {
            check_column_len(name, column, self.n_vars())?;
        }

        self.layers.extend(update.layers);
        self.obs.extend(update.obs);
        self.var.extend(update.var);
        self.uns.extend(update.uns);
        Ok(())
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.get(name)
    }

    pub fn layer_names(&self) -> Vec<Box<str>> {
        self.layers.keys().cloned().collect()
    }

    pub fn set_obs(&mut self, name: &str, column: Column) -> Result<()> {
        check_column_len(name, &column, self.n_obs())?;
        self.obs.insert(name.into(), column);
        Ok(())
    }

    pub fn obs(&self, name: &str) -> Option<&Column> {
        self.obs.get(name)
    }

    pub fn set_var(&mut self, name: &str, column: Column) -> Result<()> {
        check_column_len(name, &column, self.n_vars())?;
        self.var.insert(name.into(), column);
        Ok(())
    }

    pub fn var(&self, name: &str) -> Option<&Column> {
        self.var.get(name)
    }

    pub fn set_uns(&mut self, name: &str, entry: UnsEntry) {
        self.uns.insert(name.into(), entry);
    }

    pub fn uns(&self, name: &str) -> Option<&UnsEntry> {
        self.uns.get(name)
    }

    /// Write obs and var tables and the dense layers
    ///
    /// * `{header}.obs.tsv.gz` - cell names and every obs column
    /// * `{header}.var.tsv.gz` - gene names and every var column
    /// * `{header}.{layer}.tsv.gz` - one file per dense layer
    pub fn write_annotations(&self, header: &str) -> Result<()> {
        write_table(
            &self.obs_names,
            &self.obs,
            &format!("{}.obs.tsv.gz", header),
        )?;
        write_table(
            &self.var_names,
            &self.var,
            &format!("{}.var.tsv.gz", header),
        )?;

        for (name, layer) in self.layers.iter() {
            if let Layer::Dense(x) = layer {
                x.to_tsv(&format!("{}.{}.tsv.gz", header, name))?;
            }
        }
        Ok(())
    }
}

fn check_column_len(name: &str, column: &Column, expected: usize) -> Result<()> {
    if column.len() != expected {
        return Err(Cell2fateError::ShapeMismatch {
            site: format!("column {}", name),
            expected: vec![expected],
            found: vec![column.len()],
        });
    }
    Ok(())
}

fn write_table(
    names: &[Box<str>],
    columns: &BTreeMap<Box<str>, Column>,
    file: &str,
) -> Result<()> {
    let mut lines = Vec::with_capacity(names.len() + 1);

    let hdr: Vec<&str> = std::iter::once("name")
        .chain(columns.keys().map(|k| k.as_ref()))
        .collect();
    lines.push(hdr.join("\t").into_boxed_str());

    for (i, name) in names.iter().enumerate() {
        let mut words: Vec<Box<str>> = vec![name.clone()];
        for col in columns.values() {
            words.push(col.value_str(i).unwrap_or_default());
        }
        lines.push(words.join("\t").into_boxed_str());
    }

    matrix_util::common_io::mkdir(file)?;
    write_lines(&lines, file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_util::common_io::read_lines;
    use matrix_util::traits::MatTriplets;

    #[test]
    fn names_must_be_unique() {
        let dup = AnnData::new(vec!["a".into(), "a".into()], vec!["g".into()]);
        assert!(dup.is_err());
        let empty = AnnData::new(vec!["".into()], vec!["g".into()]);
        assert!(empty.is_err());
    }

    #[test]
    fn slots_check_dimensions() -> anyhow::Result<()> {
        let mut adata = AnnData::with_default_names(3, 2)?;
        assert!(adata
            .set_layer("x", Layer::Dense(Array2::zeros((2, 3))))
            .is_err());
        adata.set_layer("x", Layer::Dense(Array2::ones((3, 2))))?;
        assert_eq!(adata.layer("x").map(|x| x.shape()), Some((3, 2)));

        assert!(adata.set_obs("t", Column::Numeric(vec![0.0; 2])).is_err());
        adata.set_obs("t", Column::Numeric(vec![0.0; 3]))?;
        adata.set_var("r", Column::Integer(vec![1, 2]))?;
        assert_eq!(adata.var("r").and_then(|c| c.value_str(1)), Some("2".into()));
        Ok(())
    }

    #[test]
    fn staged_update_is_all_or_nothing() -> anyhow::Result<()> {
        let mut adata = AnnData::with_default_names(3, 2)?;

        let mut bad = SlotUpdate::new();
        bad.obs("t", Column::Numeric(vec![1.0; 3]));
        bad.uns("note", UnsEntry::Array(ArrayD::zeros(IxDyn(&[1]))));
        bad.layer("x", Layer::Dense(Array2::ones((3, 3))));
        assert!(adata.apply(bad).is_err());
        assert!(adata.obs("t").is_none());
        assert!(adata.uns("note").is_none());
        assert!(adata.layer("x").is_none());

        let mut good = SlotUpdate::new();
        good.obs("t", Column::Numeric(vec![1.0; 3]));
        good.var("r", Column::Integer(vec![1, 2]));
        good.layer("x", Layer::Dense(Array2::ones((3, 2))));
        adata.apply(good)?;
        assert_eq!(adata.obs("t").map(|c| c.len()), Some(3));
        assert_eq!(adata.layer("x").map(|x| x.shape()), Some((3, 2)));
        Ok(())
    }

    #[test]
    fn sparse_and_dense_layers_agree() -> anyhow::Result<()> {
        let dense = array![[0.0_f32, 2.0], [3.0, 0.0], [0.0, 0.0]];
        let (nr, nc, triplets) = dense.to_nonzero_triplets()?;
        let sparse = CsrMatrix::<f32>::from_nonzero_triplets(nr, nc, triplets)?;

        let a = Layer::Dense(dense.clone());
        let b = Layer::Sparse(sparse);
        assert_eq!(a.rows_to_dense(&[2, 0])?, b.rows_to_dense(&[2, 0])?);
        assert!(b.is_count_data());
        Ok(())
    }

    #[test]
    fn annotations_are_written_as_tables() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let header = dir.path().join("out").join("adata");
        let header = header.to_str().ok_or_else(|| anyhow::anyhow!("path"))?;

        let mut adata = AnnData::with_default_names(2, 3)?;
        adata.set_obs("batch", Column::Categorical(vec!["b".into(), "a".into()]))?;
        adata.set_layer("velocity", Layer::Dense(Array2::ones((2, 3))))?;
        adata.write_annotations(header)?;

        let obs = read_lines(&format!("{}.obs.tsv.gz", header))?;
        assert_eq!(obs.len(), 3);
        assert_eq!(obs[0].as_ref(), "name\tbatch");
        assert_eq!(obs[2].as_ref(), "cell_1\ta");

        let velocity = Array2::<f32>::from_tsv(&format!("{}.velocity.tsv.gz", header), None)?;
        assert_eq!(velocity.dim(), (2, 3));
        Ok(())
    }
}
