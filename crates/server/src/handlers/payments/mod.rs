pub mod mercadopago;
pub mod payu;
