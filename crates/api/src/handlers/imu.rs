//! Handler for `/analyze-imu`.

use axum::extract::Multipart;
use axum::Json;
use kinetrack_core::imu::{self, AngleSample};
use kinetrack_core::quaternion::DEFAULT_ANGLE_OFFSET_DEG;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;

#[derive(Debug, Serialize)]
pub struct ImuAnalysisResponse {
    pub angles: Vec<AngleSample>,
    pub count: usize,
}

/// Form fields of one IMU request, after parsing.
#[derive(Debug)]
struct ImuForm {
    sensor1: Vec<u8>,
    sensor2: Vec<u8>,
    delimiter: char,
    skip_rows: usize,
    offset_deg: f64,
}

async fn read_form(mut multipart: Multipart) -> AppResult<ImuForm> {
    let mut sensor1: Option<Vec<u8>> = None;
    let mut sensor2: Option<Vec<u8>> = None;
    let mut delimiter = imu::DEFAULT_DELIMITER;
    let mut skip_rows = imu::DEFAULT_SKIP_ROWS;
    let mut offset_deg = DEFAULT_ANGLE_OFFSET_DEG;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "sensor1" | "sensor2" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?
                    .to_vec();
                if name == "sensor1" {
                    sensor1 = Some(data);
                } else {
                    sensor2 = Some(data);
                }
            }
            "delimiter" | "skip_rows" | "offset_degrees" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                match name.as_str() {
                    "delimiter" => delimiter = imu::parse_delimiter(&text)?,
                    "skip_rows" => {
                        skip_rows = text.trim().parse().map_err(|_| {
                            AppError::BadRequest(format!(
                                "skip_rows must be a non-negative integer, got {text:?}"
                            ))
                        })?;
                    }
                    _ => {
                        offset_deg = text
                            .trim()
                            .parse::<f64>()
                            .ok()
                            .filter(|v| v.is_finite())
                            .ok_or_else(|| {
                                AppError::BadRequest(format!(
                                    "offset_degrees must be a number, got {text:?}"
                                ))
                            })?;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(ImuForm {
        sensor1: sensor1
            .ok_or_else(|| AppError::BadRequest("Missing required 'sensor1' field".into()))?,
        sensor2: sensor2
            .ok_or_else(|| AppError::BadRequest("Missing required 'sensor2' field".into()))?,
        delimiter,
        skip_rows,
        offset_deg,
    })
}

/// POST /api/v1/analyze-imu
///
/// Multipart form with two sensor exports (`sensor1` = reference segment,
/// `sensor2` = moving segment) and optional `delimiter`, `skip_rows` and
/// `offset_degrees`. Returns one relative angle per paired row.
pub async fn analyze_imu(multipart: Multipart) -> AppResult<Json<DataResponse<ImuAnalysisResponse>>> {
    let form = read_form(multipart).await?;
    tracing::info!(
        sensor1_bytes = form.sensor1.len(),
        sensor2_bytes = form.sensor2.len(),
        skip_rows = form.skip_rows,
        offset_deg = form.offset_deg,
        "IMU analysis requested",
    );

    let angles = tokio::task::spawn_blocking(move || {
        imu::analyze_imu_csv(
            &form.sensor1,
            &form.sensor2,
            form.delimiter,
            form.skip_rows,
            form.offset_deg,
        )
    })
    .await
    .map_err(|e| AppError::InternalError(format!("IMU analysis task failed: {e}")))??;

    Ok(Json(DataResponse {
        data: ImuAnalysisResponse {
            count: angles.len(),
            angles,
        },
    }))
}
