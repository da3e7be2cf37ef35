use crate::traits::Inference;
use matrix_util::common_io::mkdir;

use parquet::basic::Type as ParquetType;
use parquet::basic::{Compression, ConvertedType, ZstdLevel};
use parquet::data_type::{ByteArray, ByteArrayType, FloatType};
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::Type;
use std::fs::File;
use std::sync::Arc;

fn index_to_name(i: usize, names: Option<&[Box<str>]>) -> ByteArray {
    match names.and_then(|names| names.get(i)) {
        Some(name) => ByteArray::from(name.as_ref()),
        None => ByteArray::from(i.to_string().as_bytes()),
    }
}

/// Write down the posterior summary of one site into a parquet file in
/// the melted (long) format: `row`, `column`, `component`, `mean`,
/// `sd`, `q05`, `q95`.
///
/// * `summary` - posterior summary
/// * `site` - name of the site
/// * `row_names` - names along the first axis (e.g., cells)
/// * `column_names` - names along the second axis (e.g., genes)
/// * `file_path` - output file
///
/// Axes beyond the second are flattened into `component`.
pub fn to_parquet<P: Inference>(
    summary: &P,
    site: &str,
    row_names: Option<&[Box<str>]>,
    column_names: Option<&[Box<str>]>,
    file_path: &str,
) -> anyhow::Result<()> {
    let missing = || anyhow::anyhow!("site {} not found in the posterior summary", site);

    let mean = summary.posterior_mean(site).ok_or_else(missing)?;
    let sd = summary.posterior_sd(site).ok_or_else(missing)?;
    let q05 = summary.posterior_q05(site).ok_or_else(missing)?;
    let q95 = summary.posterior_q95(site).ok_or_else(missing)?;

    for x in [sd, q05, q95] {
        if x.shape() != mean.shape() {
            anyhow::bail!("inconsistent summary shapes for site {}", site);
        }
    }

    let shape = mean.shape();
    let nrow = shape.first().copied().unwrap_or(1);
    let ncol = shape.get(1).copied().unwrap_or(1);
    let ncomp: usize = shape.iter().skip(2).product();
    let nelem = nrow * ncol * ncomp;

    let mut rows = Vec::with_capacity(nelem);
    let mut cols = Vec::with_capacity(nelem);
    let mut comps = Vec::with_capacity(nelem);
    for i in 0..nrow {
        for j in 0..ncol {
            for k in 0..ncomp {
                rows.push(index_to_name(i, row_names));
                cols.push(index_to_name(j, column_names));
                comps.push(ByteArray::from(k.to_string().as_bytes()));
            }
        }
    }

    let flatten = |x: &ndarray::ArrayD<f32>| -> Vec<f32> { x.iter().copied().collect() };
    let values = [flatten(mean), flatten(sd), flatten(q05), flatten(q95)];

    let fields = vec![
        ("row", ParquetType::BYTE_ARRAY, ConvertedType::UTF8),
        ("column", ParquetType::BYTE_ARRAY, ConvertedType::UTF8),
        ("component", ParquetType::BYTE_ARRAY, ConvertedType::UTF8),
        ("mean", ParquetType::FLOAT, ConvertedType::NONE),
        ("sd", ParquetType::FLOAT, ConvertedType::NONE),
        ("q05", ParquetType::FLOAT, ConvertedType::NONE),
        ("q95", ParquetType::FLOAT, ConvertedType::NONE),
    ];

    let fields = fields
        .into_iter()
        .map(|(name, parquet_type, converted_type)| -> anyhow::Result<_> {
            Ok(Arc::new(
                Type::primitive_type_builder(name, parquet_type)
                    .with_repetition(parquet::basic::Repetition::REQUIRED)
                    .with_converted_type(converted_type)
                    .build()?,
            ))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let schema = Arc::new(
        Type::group_type_builder("PosteriorSummary")
            .with_fields(fields)
            .build()?,
    );

    mkdir(file_path)?;
    let file = File::create(file_path)?;
    let zstd_level = ZstdLevel::try_new(5)?;
    let writer_properties = Arc::new(
        WriterProperties::builder()
            .set_compression(Compression::ZSTD(zstd_level))
            .build(),
    );
    let mut writer = SerializedFileWriter::new(file, schema, writer_properties)?;
    let mut row_group_writer = writer.next_row_group()?;

    for data in [&rows, &cols, &comps] {
        if let Some(mut column_writer) = row_group_writer.next_column()? {
            let typed_writer = column_writer.typed::<ByteArrayType>();
            typed_writer.write_batch(data, None, None)?;
            column_writer.close()?;
        }
    }

    for data in values.iter() {
        if let Some(mut column_writer) = row_group_writer.next_column()? {
            let typed_writer = column_writer.typed::<FloatType>();
            typed_writer.write_batch(data, None, None)?;
            column_writer.close()?;
        }
    }

    row_group_writer.close()?;
    writer.close()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::PosteriorSummary;
    use ndarray::Array3;
    use parquet::file::reader::{FileReader, SerializedFileReader};

    #[test]
    fn melted_rows_cover_every_element() -> anyhow::Result<()> {
        let draws = Array3::<f32>::from_shape_fn((5, 3, 2), |(s, i, j)| (s + i + j) as f32).into_dyn();
        let mut summary = PosteriorSummary::default();
        summary.insert_draws("mu", draws.view())?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out").join("mu.parquet");
        let path = path.to_str().ok_or_else(|| anyhow::anyhow!("path"))?;

        let cells: Vec<Box<str>> = vec!["c0".into(), "c1".into(), "c2".into()];
        to_parquet(&summary, "mu", Some(&cells), None, path)?;

        let reader = SerializedFileReader::new(File::open(path)?)?;
        let meta = reader.metadata();
        assert_eq!(meta.file_metadata().num_rows(), 6);
        assert_eq!(meta.file_metadata().schema_descr().num_columns(), 7);

        assert!(to_parquet(&summary, "nope", None, None, path).is_err());
        Ok(())
    }
}
