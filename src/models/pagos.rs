use std::convert::Infallible;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::form_urlencoded;

/// Backend-owned identifier of a cita, paciente or pago.
///
/// Numeric ids are kept numeric so JSON bodies carry them as numbers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ResourceId {
    Number(u64),
    Text(String),
}

impl ResourceId {
    /// `0` and blank text are treated the same as no id at all.
    pub fn is_missing(&self) -> bool {
        match self {
            ResourceId::Number(n) => *n == 0,
            ResourceId::Text(text) => text.trim().is_empty(),
        }
    }

    /// The id as a single, percent-encoded URL path segment.
    pub fn path_segment(&self) -> String {
        match self {
            ResourceId::Number(n) => n.to_string(),
            // byte_serialize writes spaces as '+' and a literal '+' as %2B
            ResourceId::Text(text) => form_urlencoded::byte_serialize(text.as_bytes())
                .collect::<String>()
                .replace('+', "%20"),
        }
    }
}

/// Returns the id only if it was provided and is neither `0` nor blank.
pub fn present(id: Option<&ResourceId>) -> Option<&ResourceId> {
    id.filter(|id| !id.is_missing())
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Number(n) => write!(f, "{}", n),
            ResourceId::Text(text) => f.write_str(text),
        }
    }
}

impl From<u64> for ResourceId {
    fn from(id: u64) -> Self {
        ResourceId::Number(id)
    }
}

impl From<u32> for ResourceId {
    fn from(id: u32) -> Self {
        ResourceId::Number(id.into())
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        id.to_string().into()
    }
}

/// Text becomes numeric only in canonical form, so `"007"` stays text.
impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        let trimmed = id.trim();
        match trimmed.parse::<u64>() {
            Ok(n) if n.to_string() == trimmed => ResourceId::Number(n),
            _ => ResourceId::Text(id),
        }
    }
}

impl FromStr for ResourceId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.to_string().into())
    }
}

/// First present of `total` and the legacy `monto`. Zero counts as present.
pub fn effective_total(total: Option<Decimal>, monto: Option<Decimal>) -> Option<Decimal> {
    total.or(monto)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Transferencia,
    Consultorio,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Transferencia => "TRANSFERENCIA",
            PaymentMethod::Consultorio => "CONSULTORIO",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRANSFERENCIA" => Ok(PaymentMethod::Transferencia),
            "CONSULTORIO" => Ok(PaymentMethod::Consultorio),
            other => Err(format!("Unknown payment method: {}", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pendiente,
    Aprobado,
    Rechazado,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pendiente => "PENDIENTE",
            PaymentStatus::Aprobado => "APROBADO",
            PaymentStatus::Rechazado => "RECHAZADO",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDIENTE" => Ok(PaymentStatus::Pendiente),
            "APROBADO" => Ok(PaymentStatus::Aprobado),
            "RECHAZADO" => Ok(PaymentStatus::Rechazado),
            other => Err(format!("Unknown payment status: {}", other)),
        }
    }
}

/// Query filters for `GET pagos/`. The backend scopes results by role.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaymentFilters {
    pub paciente: Option<ResourceId>,
    pub metodo_pago: Option<PaymentMethod>,
    pub estado_pago: Option<PaymentStatus>,
}

impl PaymentFilters {
    pub fn by_patient(paciente: impl Into<ResourceId>) -> Self {
        Self {
            paciente: Some(paciente.into()),
            ..Default::default()
        }
    }

    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = Vec::new();
        if let Some(paciente) = &self.paciente {
            query.push(("paciente".to_string(), paciente.to_string()));
        }
        if let Some(metodo) = self.metodo_pago {
            query.push(("metodo_pago".to_string(), metodo.to_string()));
        }
        if let Some(estado) = self.estado_pago {
            query.push(("estado_pago".to_string(), estado.to_string()));
        }
        query
    }
}

/// Proof-of-transfer upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Comprobante {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Comprobante {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Self {
            file_name,
            mime_type,
            bytes,
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "comprobante".to_string());

        Ok(Self::new(file_name, bytes))
    }
}

/// Parameters of a transfer payment (patient flow).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransferPayment {
    pub cita_id: Option<ResourceId>,
    pub monto: Option<Decimal>,
    pub total: Option<Decimal>,
    pub comprobante: Option<Comprobante>,
}

impl TransferPayment {
    pub fn new(cita_id: impl Into<ResourceId>) -> Self {
        Self {
            cita_id: Some(cita_id.into()),
            ..Default::default()
        }
    }

    pub fn with_total(mut self, total: Decimal) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_monto(mut self, monto: Decimal) -> Self {
        self.monto = Some(monto);
        self
    }

    pub fn with_comprobante(mut self, comprobante: Comprobante) -> Self {
        self.comprobante = Some(comprobante);
        self
    }
}

/// Parameters of an in-office payment (doctor/admin flow).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConsultorioPayment {
    pub cita_id: Option<ResourceId>,
    pub monto: Option<Decimal>,
    pub total: Option<Decimal>,
}

impl ConsultorioPayment {
    pub fn new(cita_id: impl Into<ResourceId>) -> Self {
        Self {
            cita_id: Some(cita_id.into()),
            ..Default::default()
        }
    }

    pub fn with_total(mut self, total: Decimal) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_monto(mut self, monto: Decimal) -> Self {
        self.monto = Some(monto);
        self
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ConsultorioPayload {
    pub cita: ResourceId,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::str_option"
    )]
    pub total: Option<Decimal>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RevertPayment {
    pub pago_id: Option<ResourceId>,
    pub motivo_reverso: Option<String>,
}

impl RevertPayment {
    pub fn new(pago_id: impl Into<ResourceId>) -> Self {
        Self {
            pago_id: Some(pago_id.into()),
            motivo_reverso: None,
        }
    }

    pub fn with_motivo(mut self, motivo: impl Into<String>) -> Self {
        self.motivo_reverso = Some(motivo.into());
        self
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RevertPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motivo_reverso: Option<String>,
}

impl RevertPayload {
    /// An empty reason is not recorded.
    pub fn new(motivo_reverso: Option<&str>) -> Self {
        Self {
            motivo_reverso: motivo_reverso
                .filter(|motivo| !motivo.is_empty())
                .map(str::to_string),
        }
    }
}

/// Payment record as the backend serialises it.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Payment {
    pub id: u64,
    #[serde(default)]
    pub paciente: Option<u64>,
    pub cita: u64,
    pub total: Decimal,
    #[serde(default)]
    pub pagado: Decimal,
    pub fecha: NaiveDate,
    #[serde(default)]
    pub verificado: bool,
    pub metodo_pago: PaymentMethod,
    pub estado_pago: PaymentStatus,
    #[serde(default)]
    pub comprobante: Option<String>,
    #[serde(default)]
    pub revertido: bool,
    #[serde(default)]
    pub motivo_reverso: String,
    #[serde(default)]
    pub fecha_reverso: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub metodo_pago_display: Option<String>,
    #[serde(default)]
    pub estado_pago_display: Option<String>,
}

impl Payment {
    /// Not reverted and not rejected. The backend allows one such transfer
    /// payment per cita.
    pub fn is_active(&self) -> bool {
        !self.revertido && self.estado_pago != PaymentStatus::Rechazado
    }

    pub fn saldo_pendiente(&self) -> Decimal {
        self.total - self.pagado
    }

    /// Reads a `GET pagos/` body, plain list or paginated `{"results": [...]}`.
    pub fn list_from_value(value: &Value) -> Result<Vec<Payment>, serde_json::Error> {
        match value.get("results") {
            Some(results) => Vec::<Payment>::deserialize(results),
            None => Vec::<Payment>::deserialize(value),
        }
    }
}
