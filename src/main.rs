#[rocket::main]
async fn main() -> Result<(), rocket::Error> {
    lrcom_server::rocket().launch().await?;
    Ok(())
}
