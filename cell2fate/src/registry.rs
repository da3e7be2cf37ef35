use crate::anndata::{AnnData, Column, Layer};
use crate::config::SetupArgs;
use crate::error::{Cell2fateError, Result};

use log::info;
use matrix_util::traits::CountOps;
use std::collections::{BTreeMap, BTreeSet};

/// Registry keys
pub mod keys {
    pub const UNSPLICED: &str = "unspliced";
    pub const SPLICED: &str = "spliced";
    pub const BATCH: &str = "batch";
    pub const INDICES: &str = "ind_x";
    pub const LABELS: &str = "labels";
}

/// obs column holding `0..n_obs`
pub const INDICES_OBS_KEY: &str = "_indices";

#[derive(Debug, Clone)]
pub enum RegistryField {
    Layer(Layer),
    Categorical {
        codes: Vec<usize>,
        categories: Vec<Box<str>>,
    },
    Index(Vec<i64>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryStats {
    pub n_cells: usize,
    pub n_vars: usize,
    pub n_batch: usize,
    pub n_labels: usize,
}

/// Validated snapshot of the fields the model reads from an `AnnData`
#[derive(Debug, Clone)]
pub struct DataRegistry {
    fields: BTreeMap<Box<str>, RegistryField>,
    obs_names: Vec<Box<str>>,
    var_names: Vec<Box<str>>,
    setup_args: SetupArgs,
}

/// Register unspliced and spliced counts, batch membership and cell
/// indices of `adata`
///
/// Adds the obs column `_indices` to `adata`.
pub fn setup_anndata(adata: &mut AnnData, args: &SetupArgs) -> Result<DataRegistry> {
    let n_obs = adata.n_obs();
    adata.set_obs(
        INDICES_OBS_KEY,
        Column::Integer((0..n_obs).map(|i| i as i64).collect()),
    )?;

    let mut fields = BTreeMap::new();

    for (key, label) in [
        (keys::UNSPLICED, &args.unspliced_label),
        (keys::SPLICED, &args.spliced_label),
    ] {
        let layer = adata
            .layer(label)
            .ok_or_else(|| Cell2fateError::MissingLayer(label.clone()))?;

        if args.validate_counts {
            if let Some((row, column, value)) = layer.find_non_count() {
                return Err(Cell2fateError::InvalidCounts {
                    layer: label.clone(),
                    row,
                    column,
                    value,
                });
            }
        }
        fields.insert(key.into(), RegistryField::Layer(layer.clone()));
    }

    let batch = match args.batch_key.as_deref() {
        Some(batch_key) => categorical_field(adata, batch_key)?,
        None => RegistryField::Categorical {
            codes: vec![0; n_obs],
            categories: vec!["0".into()],
        },
    };
    fields.insert(keys::BATCH.into(), batch);

    let indices = match adata.obs(INDICES_OBS_KEY) {
        Some(Column::Integer(x)) => x.clone(),
        _ => return Err(Cell2fateError::MissingObsKey(INDICES_OBS_KEY.into())),
    };
    fields.insert(keys::INDICES.into(), RegistryField::Index(indices));

    if let Some(labels_key) = args.labels_key.as_deref() {
        fields.insert(keys::LABELS.into(), categorical_field(adata, labels_key)?);
    }

    let registry = DataRegistry {
        fields,
        obs_names: adata.obs_names().to_vec(),
        var_names: adata.var_names().to_vec(),
        setup_args: args.clone(),
    };

    let stats = registry.summary_stats();
    info!(
        "registered {} cells x {} genes, {} batch(es), {} label(s)",
        stats.n_cells, stats.n_vars, stats.n_batch, stats.n_labels
    );

    Ok(registry)
}

/// Dense codes over sorted categories
fn categorical_field(adata: &AnnData, key: &str) -> Result<RegistryField> {
    let column = adata
        .obs(key)
        .ok_or_else(|| Cell2fateError::MissingObsKey(key.into()))?;

    let categories: Vec<Box<str>> = match column {
        Column::Integer(x) => x
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|v| v.to_string().into_boxed_str())
            .collect(),
        _ => (0..column.len())
            .filter_map(|i| column.value_str(i))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    };

    let position: BTreeMap<&str, usize> = categories
        .iter()
        .enumerate()
        .map(|(k, x)| (x.as_ref(), k))
        .collect();

    let codes = (0..column.len())
        .map(|i| {
            column
                .value_str(i)
                .and_then(|x| position.get(x.as_ref()).copied())
                .ok_or_else(|| Cell2fateError::MissingObsKey(format!("{}[{}]", key, i)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RegistryField::Categorical { codes, categories })
}

fn is_layer_key(key: &str) -> bool {
    key == keys::UNSPLICED || key == keys::SPLICED
}

impl DataRegistry {
    /// The registered field under `key`
    pub fn get_from_registry(&self, key: &str) -> Result<&RegistryField> {
        self.fields.get(key).ok_or_else(|| {
            if is_layer_key(key) {
                Cell2fateError::MissingLayer(key.into())
            } else {
                Cell2fateError::MissingObsKey(key.into())
            }
        })
    }

    pub fn layer(&self, key: &str) -> Result<&Layer> {
        match self.get_from_registry(key)? {
            RegistryField::Layer(x) => Ok(x),
            _ => Err(Cell2fateError::MissingLayer(key.into())),
        }
    }

    pub fn unspliced(&self) -> Result<&Layer> {
        self.layer(keys::UNSPLICED)
    }

    pub fn spliced(&self) -> Result<&Layer> {
        self.layer(keys::SPLICED)
    }

    fn categorical(&self, key: &str) -> Result<(&[usize], &[Box<str>])> {
        match self.get_from_registry(key)? {
            RegistryField::Categorical { codes, categories } => Ok((codes, categories)),
            _ => Err(Cell2fateError::MissingObsKey(key.into())),
        }
    }

    /// Batch code of every cell
    pub fn batch_codes(&self) -> Result<&[usize]> {
        Ok(self.categorical(keys::BATCH)?.0)
    }

    pub fn batch_categories(&self) -> Result<&[Box<str>]> {
        Ok(self.categorical(keys::BATCH)?.1)
    }

    pub fn label_codes(&self) -> Result<&[usize]> {
        Ok(self.categorical(keys::LABELS)?.0)
    }

    /// Registered cell indices
    pub fn indices(&self) -> Result<&[i64]> {
        match self.get_from_registry(keys::INDICES)? {
            RegistryField::Index(x) => Ok(x),
            _ => Err(Cell2fateError::MissingObsKey(keys::INDICES.into())),
        }
    }

    pub fn obs_names(&self) -> &[Box<str>] {
        &self.obs_names
    }

    pub fn var_names(&self) -> &[Box<str>] {
        &self.var_names
    }

    pub fn setup_args(&self) -> &SetupArgs {
        &self.setup_args
    }

    pub fn summary_stats(&self) -> SummaryStats {
        let n_batch = self.batch_categories().map(|x| x.len()).unwrap_or(0);
        let n_labels = self
            .categorical(keys::LABELS)
            .map(|(_, x)| x.len())
            .unwrap_or(0);
        SummaryStats {
            n_cells: self.obs_names.len(),
            n_vars: self.var_names.len(),
            n_batch,
            n_labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::prelude::*;

    fn toy_adata() -> anyhow::Result<AnnData> {
        let mut adata = AnnData::with_default_names(4, 3)?;
        adata.set_layer("unspliced", Layer::Dense(Array2::ones((4, 3))))?;
        adata.set_layer("spliced", Layer::Dense(Array2::from_elem((4, 3), 2.0)))?;
        adata.set_obs(
            "sample",
            Column::Categorical(vec!["s2".into(), "s1".into(), "s2".into(), "s3".into()]),
        )?;
        Ok(adata)
    }

    #[test]
    fn fields_are_registered() -> anyhow::Result<()> {
        let mut adata = toy_adata()?;
        let args = SetupArgs {
            batch_key: Some("sample".into()),
            ..Default::default()
        };
        let registry = setup_anndata(&mut adata, &args)?;

        assert_eq!(
            adata.obs(INDICES_OBS_KEY),
            Some(&Column::Integer(vec![0, 1, 2, 3]))
        );
        assert_eq!(registry.indices()?, &[0, 1, 2, 3]);
        assert_eq!(registry.batch_codes()?, &[1, 0, 1, 2]);
        assert_eq!(
            registry.batch_categories()?,
            &[Box::<str>::from("s1"), "s2".into(), "s3".into()]
        );
        assert_eq!(registry.spliced()?.shape(), (4, 3));
        assert_eq!(
            registry.summary_stats(),
            SummaryStats {
                n_cells: 4,
                n_vars: 3,
                n_batch: 3,
                n_labels: 0
            }
        );
        Ok(())
    }

    #[test]
    fn no_batch_key_means_one_batch() -> anyhow::Result<()> {
        let mut adata = toy_adata()?;
        let registry = setup_anndata(&mut adata, &SetupArgs::default())?;
        assert_eq!(registry.batch_codes()?, &[0, 0, 0, 0]);
        assert_eq!(registry.summary_stats().n_batch, 1);
        assert!(matches!(
            registry.get_from_registry(keys::LABELS),
            Err(Cell2fateError::MissingObsKey(_))
        ));
        Ok(())
    }

    #[test]
    fn missing_and_invalid_layers_fail() -> anyhow::Result<()> {
        let mut adata = toy_adata()?;
        let args = SetupArgs {
            spliced_label: "nope".into(),
            ..Default::default()
        };
        assert!(matches!(
            setup_anndata(&mut adata, &args),
            Err(Cell2fateError::MissingLayer(_))
        ));

        let mut counts = Array2::<f32>::ones((4, 3));
        counts[(2, 1)] = 0.5;
        adata.set_layer("unspliced", Layer::Dense(counts))?;
        assert!(matches!(
            setup_anndata(&mut adata, &SetupArgs::default()),
            Err(Cell2fateError::InvalidCounts { row: 2, column: 1, .. })
        ));

        let lenient = SetupArgs {
            validate_counts: false,
            ..Default::default()
        };
        assert!(setup_anndata(&mut adata, &lenient).is_ok());

        let missing_batch = SetupArgs {
            batch_key: Some("donor".into()),
            ..Default::default()
        };
        let mut adata = toy_adata()?;
        assert!(matches!(
            setup_anndata(&mut adata, &missing_batch),
            Err(Cell2fateError::MissingObsKey(_))
        ));
        Ok(())
    }
}
