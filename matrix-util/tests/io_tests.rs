use matrix_util::common_io::read_lines;
use matrix_util::traits::IoOps;
use ndarray::array;

#[test]
fn ndarray_io_test() -> anyhow::Result<()> {
    let xx = array![[0.5_f32, 1.0, 2.0], [3.25, 4.0, 0.0]];

    let dir = tempfile::tempdir()?;
    let tsv_file = dir.path().join("x.tsv.gz");
    let tsv_file = tsv_file.to_str().ok_or_else(|| anyhow::anyhow!("path"))?;
    xx.to_tsv(tsv_file)?;

    let yy = ndarray::Array2::<f32>::read_file_delim(tsv_file, "\t", None)?;
    approx::assert_abs_diff_eq!(xx, yy);

    Ok(())
}

#[test]
fn csv_with_header_is_skipped() -> anyhow::Result<()> {
    let xx = array![[1.0_f32, 2.0], [3.0, 4.0]];

    let dir = tempfile::tempdir()?;
    let csv_file = dir.path().join("x.csv");
    let csv_file = csv_file.to_str().ok_or_else(|| anyhow::anyhow!("path"))?;
    xx.to_csv(csv_file)?;
    assert_eq!(read_lines(csv_file)?.len(), 2);

    let yy = ndarray::Array2::<f32>::read_file_delim(csv_file, ",", Some(0))?;
    assert_eq!(yy.dim(), (1, 2));
    assert_eq!(yy[(0, 0)], 3.0);

    Ok(())
}
